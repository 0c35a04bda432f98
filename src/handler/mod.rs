//! Handler module - request dispatch on the server side.
//!
//! Provides:
//! - [`Handler`] - the capability the server invokes for every request
//! - [`ServiceRegistry`] - maps `"Service.Method"` names to typed handlers
//! - [`handler_fn`] - turns a closure over the raw [`Body`] into a handler
//! - [`RequestContext`] - identifies the request being handled
//!
//! # Example
//!
//! ```ignore
//! use seqwire::handler::ServiceRegistry;
//!
//! let mut registry = ServiceRegistry::new();
//!
//! registry.register("Svc.Echo", |msg: String, _ctx| async move { Ok(msg) })?;
//! registry.register("Arith.Sum", |(a, b): (i64, i64), _ctx| async move { Ok(a + b) })?;
//! ```

mod context;
mod registry;

pub use context::{Body, RequestContext};
pub use registry::{
    handler_fn, BoxFuture, Handler, HandlerFn, HandlerResult, ServiceRegistry, TypedHandler,
};
