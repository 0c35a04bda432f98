//! Transport module - listeners the server can accept connections from.
//!
//! Provides:
//! - [`Listener`] - anything yielding duplex byte streams
//! - TCP via [`tokio::net::TcpListener`]
//! - Unix Domain Sockets via [`UnixSocketListener`] (Linux/macOS)

#[cfg(unix)]
mod unix;

use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

#[cfg(unix)]
pub use unix::{SocketCleanup, UnixSocketListener};

/// Source of inbound connections for [`crate::Server::serve`].
pub trait Listener: Send + 'static {
    /// Connected stream type.
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    /// Wait for the next connection, returning it with a printable peer
    /// address.
    ///
    /// An error is treated as fatal for the listener.
    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, String)>> + Send;
}

impl Listener for TcpListener {
    type Stream = tokio::net::TcpStream;

    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, String)>> + Send {
        async move {
            let (stream, addr) = TcpListener::accept(self).await?;
            stream.set_nodelay(true)?;
            Ok((stream, addr.to_string()))
        }
    }
}
