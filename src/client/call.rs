//! Call record for one in-flight request.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::{Result, RpcError};
use crate::protocol::NO_CALL_SEQ;

/// An RPC issued by a [`crate::Client`].
///
/// A call is delivered exactly once on its `done` channel, either with a
/// reply or with an error.
#[derive(Debug)]
pub struct Call {
    /// Sequence number, [`NO_CALL_SEQ`] if the call was never registered.
    pub seq: u64,
    /// Target method, formatted `"Service.Method"`.
    pub service_method: String,
    /// Arguments as sent.
    pub args: Value,
    /// Decoded reply body, set on success.
    pub reply: Option<Value>,
    /// Set when the call failed.
    pub error: Option<RpcError>,
    done: mpsc::Sender<Call>,
}

impl Call {
    pub(crate) fn new(service_method: &str, args: Value, done: mpsc::Sender<Call>) -> Self {
        Self {
            seq: NO_CALL_SEQ,
            service_method: service_method.to_string(),
            args,
            reply: None,
            error: None,
            done,
        }
    }

    /// Whether the call completed without error.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Consume the call and decode its reply into `R`.
    pub fn reply<R: DeserializeOwned>(self) -> Result<R> {
        if let Some(err) = self.error {
            return Err(err);
        }
        serde_json::from_value(self.reply.unwrap_or(Value::Null)).map_err(|e| {
            RpcError::Decode(format!("reply of {}: {}", self.service_method, e))
        })
    }

    pub(crate) fn fail(mut self, err: RpcError) {
        self.error = Some(err);
        self.finish();
    }

    /// Deliver the call on its done channel without ever waiting.
    pub(crate) fn finish(self) {
        let done = self.done.clone();
        match done.try_send(self) {
            Ok(()) => {}
            Err(TrySendError::Full(call)) => {
                tracing::warn!(
                    "Discarding completion of call {} ({}): done channel is full",
                    call.seq,
                    call.service_method
                );
            }
            Err(TrySendError::Closed(call)) => {
                tracing::debug!(
                    "Caller stopped waiting for call {} ({})",
                    call.seq,
                    call.service_method
                );
            }
        }
    }
}
