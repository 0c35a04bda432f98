//! Per-request values handed to handlers.
//!
//! - [`Body`] - the decoded argument payload, not yet bound to a type
//! - [`RequestContext`] - the method name and sequence number of the request
//!
//! # Example
//!
//! ```ignore
//! async fn sum(args: Body, ctx: RequestContext) -> Result<Value> {
//!     let (a, b): (i64, i64) = args.decode()?;
//!     tracing::debug!("{} #{}", ctx.service_method(), ctx.seq());
//!     Ok(json!(a + b))
//! }
//! ```

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Result, RpcError};

/// Argument payload of a request.
///
/// The server never interprets arguments itself: the handler decides which
/// type to decode them into.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    value: Value,
}

impl Body {
    /// Wrap an already decoded payload.
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// Decode the arguments into the type the handler expects.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T> {
        serde_json::from_value(self.value)
            .map_err(|e| RpcError::Decode(format!("invalid arguments: {}", e)))
    }

    /// Borrow the untyped payload.
    #[inline]
    pub fn as_value(&self) -> &Value {
        &self.value
    }

    /// Take the untyped payload.
    #[inline]
    pub fn into_value(self) -> Value {
        self.value
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

/// Identifies the request being handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    service_method: String,
    seq: u64,
}

impl RequestContext {
    /// Create a new request context.
    pub fn new(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
        }
    }

    /// Get the full `"Service.Method"` name.
    #[inline]
    pub fn service_method(&self) -> &str {
        &self.service_method
    }

    /// Get the sequence number chosen by the client.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }
}
