//! # seqwire
//!
//! Minimal RPC runtime: many concurrent calls multiplexed over one
//! byte-stream connection, correlated by sequence number.
//!
//! ## Architecture
//!
//! - **Handshake**: one JSON line carrying a magic number and the codec type
//! - **Frames**: length-prefixed header + body, encoded by the negotiated
//!   codec (MsgPack or JSON)
//! - **Client**: send lock for requests, one receive loop matching replies to
//!   pending calls in any order
//! - **Server**: one read loop per connection, one task per request,
//!   responses serialized under a connection-wide lock
//!
//! ## Example
//!
//! ```ignore
//! use seqwire::{Client, Server};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> seqwire::Result<()> {
//!     let server = Server::builder()
//!         .handle("Svc.Echo", |msg: String, _ctx| async move { Ok(msg) })
//!         .build()?;
//!     let listener = TcpListener::bind("127.0.0.1:0").await?;
//!     let addr = listener.local_addr()?;
//!     tokio::spawn(async move { server.serve(listener).await });
//!
//!     let client = Client::builder().dial(addr).await?;
//!     let reply: String = client.call("Svc.Echo", "hello").await?;
//!     assert_eq!(reply, "hello");
//!
//!     client.close().await
//! }
//! ```

pub mod codec;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod transport;

mod client;
mod server;

pub use client::{Call, Client, ClientBuilder, DEFAULT_CONNECT_TIMEOUT};
pub use error::{Result, RpcError};
pub use handler::{handler_fn, Body, Handler, RequestContext, ServiceRegistry};
pub use server::{Server, ServerBuilder, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_CONCURRENT_REQUESTS};
