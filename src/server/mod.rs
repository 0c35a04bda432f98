//! Server builder and runtime.
//!
//! The [`ServerBuilder`] collects method handlers and connection limits.
//! [`Server::serve`] accepts connections from a [`Listener`] and runs every
//! connection independently:
//! 1. Negotiating: read the handshake line and select the codec
//! 2. Serving: read frames and dispatch each request concurrently
//! 3. Draining: wait for in-flight handlers to write their responses
//! 4. Closed: shut the stream down
//!
//! # Example
//!
//! ```ignore
//! use seqwire::{Server, transport::Listener};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> seqwire::Result<()> {
//!     let server = Server::builder()
//!         .handle("Svc.Echo", |msg: String, _ctx| async move { Ok(msg) })
//!         .build()?;
//!
//!     server.serve(TcpListener::bind("127.0.0.1:9999").await?).await
//! }
//! ```

mod conn;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::CodecRegistry;
use crate::error::{Result, RpcError};
use crate::handler::{Handler, RequestContext, ServiceRegistry};
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::transport::Listener;


/// Default number of requests handled concurrently per connection.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 256;

/// Default time allowed for a peer to send its handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-connection limits shared by every connection of a server.
#[derive(Debug, Clone)]
pub(crate) struct ServerConfig {
    pub(crate) max_concurrent_requests: usize,
    pub(crate) handle_timeout: Option<Duration>,
    pub(crate) handshake_timeout: Duration,
    pub(crate) max_frame_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            handle_timeout: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Builder for configuring a [`Server`].
pub struct ServerBuilder {
    registry: ServiceRegistry,
    handler: Option<Arc<dyn Handler>>,
    codecs: CodecRegistry,
    config: ServerConfig,
    error: Option<RpcError>,
}

impl ServerBuilder {
    /// Create a new server builder.
    pub fn new() -> Self {
        Self {
            registry: ServiceRegistry::new(),
            handler: None,
            codecs: CodecRegistry::with_defaults(),
            config: ServerConfig::default(),
            error: None,
        }
    }

    /// Register a typed method handler under `"Service.Method"`.
    ///
    /// An ill-formed name is reported by [`ServerBuilder::build`].
    pub fn handle<F, T, R, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        if let Err(e) = self.registry.register(name, handler) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Dispatch every request to `handler` instead of the methods
    /// registered with [`ServerBuilder::handle`].
    pub fn handler<H: Handler>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Set the codecs a client may select in its handshake.
    ///
    /// Default: MsgPack and JSON
    pub fn codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    /// Set the maximum number of requests handled at once per connection.
    ///
    /// When the limit is reached the connection stops reading until a
    /// handler finishes. Default: 256
    pub fn max_concurrent_requests(mut self, max: usize) -> Self {
        self.config.max_concurrent_requests = max.max(1);
        self
    }

    /// Set a deadline for each handler; an expired handler gets an error
    /// response.
    ///
    /// Default: none
    pub fn handle_timeout(mut self, timeout: Duration) -> Self {
        self.config.handle_timeout = Some(timeout);
        self
    }

    /// Set the time allowed for a peer to send its handshake.
    ///
    /// Default: 10 seconds
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set the largest header or body part accepted or sent.
    ///
    /// Default: 100 MiB
    pub fn max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.config.max_frame_size = max_frame_size;
        self
    }

    /// Build the server.
    ///
    /// Fails if a method was registered under an ill-formed name.
    pub fn build(self) -> Result<Server> {
        if let Some(e) = self.error {
            return Err(e);
        }

        let handler: Arc<dyn Handler> = match self.handler {
            Some(handler) => handler,
            None => Arc::new(self.registry),
        };

        Ok(Server {
            inner: Arc::new(ServerInner {
                handler,
                codecs: Arc::new(self.codecs),
                config: self.config,
            }),
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct ServerInner {
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) codecs: Arc<CodecRegistry>,
    pub(crate) config: ServerConfig,
}

/// An RPC server. Cloning is cheap and shares handlers and configuration.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Accept connections until the listener fails.
    ///
    /// Each connection runs in its own task; an accept error ends the loop
    /// without affecting connections already accepted.
    pub async fn serve<L: Listener>(&self, mut listener: L) -> Result<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!("Accept failed, stopping server: {}", e);
                    return Err(e.into());
                }
            };

            tracing::debug!("Accepted connection from {}", peer);
            let inner = self.inner.clone();
            tokio::spawn(async move {
                if let Err(e) = conn::run(inner, stream, &peer).await {
                    tracing::debug!("Connection {} ended with error: {}", peer, e);
                }
            });
        }
    }

    /// Serve a single established connection until it closes.
    ///
    /// Returns once every in-flight request has been answered. Handshake
    /// failures and non-clean stream errors are returned after the
    /// connection has been dropped.
    pub async fn serve_conn<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        conn::run(self.inner.clone(), stream, "stream").await
    }
}
