//! Service registry for dispatching requests by `"Service.Method"` name.
//!
//! Methods are grouped by service. A request whose name has no dot, or an
//! empty service or method part, is ill-formed.
//!
//! # Example
//!
//! ```ignore
//! use seqwire::handler::ServiceRegistry;
//!
//! let mut registry = ServiceRegistry::new();
//!
//! registry.register("Svc.Echo", |msg: String, _ctx| async move { Ok(msg) })?;
//!
//! let server = Server::builder().handler(registry).build()?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{Body, RequestContext};
use crate::error::{Result, RpcError};
use crate::protocol::split_service_method;

/// Result type for handler functions: the reply payload, or an error whose
/// text is sent back in the response header.
pub type HandlerResult = Result<Value>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capability invoked by the server for every well-formed request.
///
/// Calls may run concurrently for requests on the same connection.
pub trait Handler: Send + Sync + 'static {
    /// Handle one request.
    fn call(&self, args: Body, ctx: RequestContext) -> BoxFuture<'static, HandlerResult>;
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn call(&self, args: Body, ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
        (**self).call(args, ctx)
    }
}

/// Handler built from a closure over the raw [`Body`].
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap a closure taking the undecoded [`Body`] as a [`Handler`].
///
/// ```ignore
/// let echo = handler_fn(|args: Body, _ctx| async move { Ok(args.into_value()) });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Body, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    HandlerFn { f }
}

impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Body, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, args: Body, ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.f)(args, ctx))
    }
}

/// Wrapper that decodes the arguments and encodes the reply around a typed
/// handler function.
pub struct TypedHandler<F, T, R, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, R, Fut> TypedHandler<F, T, R, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, R, Fut> Handler for TypedHandler<F, T, R, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    fn call(&self, args: Body, ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match args.decode() {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        let fut = (self.handler)(parsed, ctx);
        Box::pin(async move {
            let reply = fut.await?;
            serde_json::to_value(reply).map_err(|e| RpcError::Encode(e.to_string()))
        })
    }
}

/// Registry mapping `"Service.Method"` names to handlers.
#[derive(Default)]
pub struct ServiceRegistry {
    /// Methods by name, grouped by service.
    services: HashMap<String, HashMap<String, Arc<dyn Handler>>>,
}

impl ServiceRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed method handler.
    ///
    /// # Arguments
    ///
    /// * `name` - `"Service.Method"`
    /// * `handler` - Function taking the decoded arguments and a
    ///   [`RequestContext`], returning the reply
    ///
    /// Registering the same name twice replaces the earlier handler.
    pub fn register<F, T, R, Fut>(&mut self, name: &str, handler: F) -> Result<&mut Self>
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        self.register_handler(name, TypedHandler::new(handler))
    }

    /// Register any [`Handler`] under `name`.
    pub fn register_handler<H: Handler>(&mut self, name: &str, handler: H) -> Result<&mut Self> {
        let (service, method) = split_service_method(name).ok_or_else(|| ill_formed(name))?;
        self.services
            .entry(service.to_string())
            .or_default()
            .insert(method.to_string(), Arc::new(handler));
        Ok(self)
    }

    /// Look up the handler for `name`.
    ///
    /// The error carries the text sent back to the client.
    pub fn find(&self, name: &str) -> Result<Arc<dyn Handler>> {
        let (service, method) = split_service_method(name).ok_or_else(|| ill_formed(name))?;
        let methods = self.services.get(service).ok_or_else(|| {
            RpcError::application(format!("rpc server: can't find service {}", service))
        })?;
        methods
            .get(method)
            .cloned()
            .ok_or_else(|| {
                RpcError::application(format!("rpc server: can't find method {}", method))
            })
    }

    /// Check whether a method is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_ok()
    }

    /// All registered `"Service.Method"` names, sorted.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .iter()
            .flat_map(|(service, methods)| {
                methods.keys().map(move |method| format!("{}.{}", service, method))
            })
            .collect();
        names.sort();
        names
    }
}

impl Handler for ServiceRegistry {
    fn call(&self, args: Body, ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
        match self.find(ctx.service_method()) {
            Ok(handler) => handler.call(args, ctx),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }
}

fn ill_formed(name: &str) -> RpcError {
    RpcError::application(format!(
        "rpc server: service/method request ill-formed: {}",
        name
    ))
}
