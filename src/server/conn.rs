//! Per-connection state machine.
//!
//! ```text
//! Negotiating ──► Serving ──► Draining ──► Closed
//!      │                                     ▲
//!      └──────── bad handshake ──────────────┘
//! ```
//!
//! Every header that was read successfully gets exactly one response, even
//! when its body could not be decoded or its handler failed. Responses are
//! written under a connection-wide lock so frames never interleave.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use super::ServerInner;
use crate::codec::{Codec, CodecRegistry};
use crate::error::{Result, RpcError};
use crate::handler::{Body, Handler, RequestContext};
use crate::protocol::{read_handshake, FrameReader, FrameWriter, Header};

/// Lifecycle state of one server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    /// Waiting for the handshake line.
    Negotiating,
    /// Reading requests and dispatching handlers.
    Serving,
    /// Read side finished; waiting for in-flight handlers.
    Draining,
    /// Stream shut down.
    Closed,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnState::Negotiating => "negotiating",
            ConnState::Serving => "serving",
            ConnState::Draining => "draining",
            ConnState::Closed => "closed",
        };
        f.write_str(name)
    }
}

type SharedWriter = Arc<Mutex<FrameWriter>>;

struct Connection<'a> {
    peer: &'a str,
    state: ConnState,
}

impl Connection<'_> {
    fn enter(&mut self, state: ConnState) {
        tracing::debug!("Connection {}: {} -> {}", self.peer, self.state, state);
        self.state = state;
    }
}

/// Run one connection from handshake to close.
pub(crate) async fn run<S>(server: Arc<ServerInner>, stream: S, peer: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut conn = Connection {
        peer,
        state: ConnState::Negotiating,
    };
    let config = &server.config;

    let (read_half, write_half) = tokio::io::split(stream);
    let mut buffered = BufReader::new(read_half);

    let negotiated =
        tokio::time::timeout(config.handshake_timeout, negotiate(&mut buffered, &server.codecs))
            .await
            .unwrap_or_else(|_| {
                Err(RpcError::Handshake(format!(
                    "no handshake within {:?}",
                    config.handshake_timeout
                )))
            });
    let codec = match negotiated {
        Ok(codec) => codec,
        Err(e) => {
            tracing::warn!("Rejecting connection from {}: {}", peer, e);
            conn.enter(ConnState::Closed);
            return Err(e);
        }
    };

    conn.enter(ConnState::Serving);
    let mut reader =
        FrameReader::new(buffered, codec.clone()).with_max_frame_size(config.max_frame_size);
    let writer: SharedWriter = Arc::new(Mutex::new(
        FrameWriter::new(write_half, codec).with_max_frame_size(config.max_frame_size),
    ));
    let limiter = Arc::new(Semaphore::new(config.max_concurrent_requests));
    let mut tasks = JoinSet::new();

    let outcome = loop {
        while let Some(joined) = tasks.try_join_next() {
            log_join_error(joined);
        }

        let mut header = match reader.read_header().await {
            Ok(Some(header)) => header,
            Ok(None) => break Ok(()),
            Err(e) => {
                tracing::warn!("Read failed on {}: {}", peer, e);
                break Err(e);
            }
        };

        let args = match reader.read_body().await {
            Ok(args) => args,
            Err(e) => {
                tracing::debug!("Bad request body for seq {} on {}: {}", header.seq, peer, e);
                header.error = e.to_string();
                write_response(&writer, &mut header, &Value::Null).await;
                if e.is_connection_fatal() {
                    break Err(e);
                }
                continue;
            }
        };

        let permit = match limiter.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break Ok(()),
        };
        tasks.spawn(handle_request(
            server.handler.clone(),
            writer.clone(),
            header,
            args,
            config.handle_timeout,
            permit,
        ));
    };

    conn.enter(ConnState::Draining);
    while let Some(joined) = tasks.join_next().await {
        log_join_error(joined);
    }

    if let Err(e) = writer.lock().await.close().await {
        tracing::debug!("Close failed on {}: {}", peer, e);
    }
    conn.enter(ConnState::Closed);
    outcome
}

/// Read the handshake and select the codec it names.
async fn negotiate<R>(reader: &mut R, codecs: &CodecRegistry) -> Result<Arc<dyn Codec>>
where
    R: AsyncBufRead + Unpin,
{
    let handshake = read_handshake(reader).await?;
    handshake.validate()?;
    codecs.get(&handshake.codec_type).ok_or_else(|| {
        RpcError::Handshake(format!("unknown codec type {:?}", handshake.codec_type))
    })
}

/// Run the handler for one request and write its single response.
async fn handle_request(
    handler: Arc<dyn Handler>,
    writer: SharedWriter,
    mut header: Header,
    args: Value,
    timeout: Option<Duration>,
    _permit: OwnedSemaphorePermit,
) {
    let ctx = RequestContext::new(header.service_method.clone(), header.seq);
    let mut call = tokio::spawn(async move { handler.call(Body::new(args), ctx).await });

    let joined = match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, &mut call).await {
            Ok(joined) => joined,
            Err(_) => {
                call.abort();
                Ok(Err(RpcError::application(format!(
                    "rpc server: request handle timeout: expect within {:?}",
                    timeout
                ))))
            }
        },
        None => call.await,
    };

    let result = joined.unwrap_or_else(|e| {
        tracing::error!(
            "Handler for {} (seq {}) panicked: {}",
            header.service_method,
            header.seq,
            e
        );
        Err(RpcError::application(format!(
            "rpc server: handler for {} panicked",
            header.service_method
        )))
    });

    let body = match result {
        Ok(reply) => reply,
        Err(e) => {
            header.error = e.to_string();
            Value::Null
        }
    };
    write_response(&writer, &mut header, &body).await;
}

/// Write one response frame under the connection's send lock.
///
/// A reply that cannot be encoded is replaced by an error response.
async fn write_response(writer: &Mutex<FrameWriter>, header: &mut Header, body: &Value) {
    let mut writer = writer.lock().await;
    let err = match writer.write(header, body).await {
        Ok(()) => return,
        Err(RpcError::Encode(msg)) => {
            header.error = format!("rpc server: can't encode reply: {}", msg);
            match writer.write(header, &Value::Null).await {
                Ok(()) => return,
                Err(e) => e,
            }
        }
        Err(e) => e,
    };
    tracing::warn!("Failed to write response for seq {}: {}", header.seq, err);
}

fn log_join_error(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!("Request task panicked: {}", e);
        }
    }
}
