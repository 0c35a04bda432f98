//! Error types for seqwire.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Main error type for all seqwire operations.
///
/// The type is `Clone` so a single terminal connection error can resolve
/// every call that was still pending on that connection.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// Transport failure while reading or writing the connection.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The client is closing or the connection has already died.
    #[error("connection is shut down")]
    Shutdown,

    /// Bad magic number, unknown codec type or unreadable negotiation line.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Framing violation (oversized part, out-of-order reads).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A value could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// A header or body could not be deserialized.
    #[error("decode error: {0}")]
    Decode(String),

    /// Failure reported by the remote handler. Displays the remote text verbatim.
    #[error("{0}")]
    Application(String),

    /// An operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl RpcError {
    /// Shorthand for building an [`RpcError::Application`] from a handler.
    pub fn application(message: impl Into<String>) -> Self {
        RpcError::Application(message.into())
    }

    /// Whether this error leaves the connection unusable.
    ///
    /// Decode, encode, application and timeout errors are call-scoped.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            RpcError::Io(_) | RpcError::Shutdown | RpcError::Handshake(_) | RpcError::Protocol(_)
        )
    }

    /// Whether this is a transport error of the given kind.
    pub fn is_io_kind(&self, kind: std::io::ErrorKind) -> bool {
        matches!(self, RpcError::Io(e) if e.kind() == kind)
    }
}

impl From<std::io::Error> for RpcError {
    fn from(e: std::io::Error) -> Self {
        RpcError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Decode(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for RpcError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        RpcError::Encode(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for RpcError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        RpcError::Decode(e.to_string())
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
