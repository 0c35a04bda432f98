//! Unix Domain Socket listener.
//!
//! # Example
//!
//! ```ignore
//! use seqwire::transport::UnixSocketListener;
//!
//! let listener = UnixSocketListener::bind("/tmp/seqwire.sock")?;
//! server.serve(listener).await?;
//! ```

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};

use super::Listener;

/// Unix Domain Socket listener that owns its socket file.
///
/// The file is removed when the listener is dropped.
pub struct UnixSocketListener {
    listener: UnixListener,
    path: PathBuf,
}

/// Cleanup guard that removes the socket file on drop.
pub struct SocketCleanup {
    path: PathBuf,
}

impl Drop for SocketCleanup {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

impl UnixSocketListener {
    /// Bind to a Unix socket path.
    ///
    /// Removes a stale socket file at the path before binding. Must be
    /// called from within a tokio runtime.
    pub fn bind(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        tracing::debug!("Listening on {}", path.display());

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Get the socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a guard that removes the socket file on drop, for callers
    /// that hand the listener off to a task.
    pub fn cleanup_guard(&self) -> SocketCleanup {
        SocketCleanup {
            path: self.path.clone(),
        }
    }
}

impl Drop for UnixSocketListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Listener for UnixSocketListener {
    type Stream = UnixStream;

    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, String)>> + Send {
        async move {
            let (stream, _addr) = self.listener.accept().await?;
            Ok((stream, format!("unix:{}", self.path.display())))
        }
    }
}
