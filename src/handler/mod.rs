//! Handler table for incoming calls.
//!
//! Maps method names to type-erased handlers. Each handler is registered
//! with concrete argument and return types; the table decodes the call's
//! argument list into those types before invoking it and encodes the
//! returned value afterwards.
//!
//! Argument lists travel as JSON arrays, so a handler's argument type is
//! normally a tuple:
//!
//! ```
//! use peer_rpc::{HandlerTable, RequestContext};
//!
//! let table = HandlerTable::new()
//!     .register("add", |_ctx: RequestContext, (a, b): (i64, i64)| async move { Ok(a + b) })
//!     .register_sync("ping", |_ctx: RequestContext, (): ()| Ok("pong"));
//!
//! assert!(table.contains("add"));
//! assert_eq!(table.len(), 2);
//! ```

mod context;

pub use context::RequestContext;

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::{Result, RpcError};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// Handler trait for type-erased functions
trait HandlerFn: Send + Sync {
    fn call(&self, args: Value, ctx: RequestContext) -> BoxFuture<'static, Result<Value>>;
}

// Async handler closures
struct AsyncHandler<F, Fut, TArgs, TResp> {
    func: F,
    _phantom: PhantomData<fn(TArgs) -> (TResp, Fut)>,
}

impl<F, Fut, TArgs, TResp> HandlerFn for AsyncHandler<F, Fut, TArgs, TResp>
where
    F: Fn(RequestContext, TArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TResp>> + Send + 'static,
    TArgs: DeserializeOwned + Send + 'static,
    TResp: Serialize + Send + 'static,
{
    fn call(&self, args: Value, ctx: RequestContext) -> BoxFuture<'static, Result<Value>> {
        let args: TArgs = match decode_args(args) {
            Ok(a) => a,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        let fut = (self.func)(ctx, args);

        Box::pin(async move {
            let resp = fut.await?;
            Ok(serde_json::to_value(resp)?)
        })
    }
}

// Synchronous handler closures
struct SyncHandler<F, TArgs, TResp> {
    func: F,
    _phantom: PhantomData<fn(TArgs) -> TResp>,
}

impl<F, TArgs, TResp> HandlerFn for SyncHandler<F, TArgs, TResp>
where
    F: Fn(RequestContext, TArgs) -> Result<TResp> + Send + Sync + 'static,
    TArgs: DeserializeOwned + Send + 'static,
    TResp: Serialize + Send + 'static,
{
    fn call(&self, args: Value, ctx: RequestContext) -> BoxFuture<'static, Result<Value>> {
        let outcome = decode_args(args)
            .and_then(|args: TArgs| (self.func)(ctx, args))
            .and_then(|resp| Ok(serde_json::to_value(resp)?));

        Box::pin(async move { outcome })
    }
}

/// Decode an argument list into a handler's parameter type.
///
/// A missing payload is an empty argument list, and an empty argument list
/// is accepted by handlers that take no arguments (`()`) or a single
/// nullable one.
fn decode_args<T: DeserializeOwned>(args: Value) -> Result<T> {
    // ---
    let args = match args {
        Value::Null => Value::Array(Vec::new()),
        other => other,
    };
    let empty = matches!(&args, Value::Array(items) if items.is_empty());

    let err = match serde_json::from_value(args) {
        Ok(decoded) => return Ok(decoded),
        Err(err) => err,
    };
    if !empty {
        return Err(RpcError::InvalidArguments(err.to_string()));
    }

    // A caller's single null argument also travels as []
    serde_json::from_value(Value::Null)
        .or_else(|_| serde_json::from_value(Value::Array(vec![Value::Null])))
        .map_err(|_| RpcError::InvalidArguments(err.to_string()))
}

/// Text of a caught panic payload.
fn panic_text(panic: &(dyn std::any::Any + Send)) -> String {
    // ---
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic in handler: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic in handler: {s}")
    } else {
        "panic in handler".to_string()
    }
}

/// Method name → handler mapping supplied to a correlator at construction.
///
/// Built once by the application and read-only afterwards. Cheap to clone.
#[derive(Clone, Default)]
pub struct HandlerTable {
    // ---
    handlers: HashMap<String, Arc<dyn HandlerFn>>,
}

impl HandlerTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async handler.
    ///
    /// Registering a name twice replaces the earlier handler.
    pub fn register<TArgs, TResp, F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        TArgs: DeserializeOwned + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(RequestContext, TArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        // ---
        let handler_obj = AsyncHandler {
            func: handler,
            _phantom: PhantomData,
        };
        self.handlers.insert(method.into(), Arc::new(handler_obj));
        self
    }

    /// Register a synchronous handler.
    ///
    /// Registering a name twice replaces the earlier handler.
    pub fn register_sync<TArgs, TResp, F>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        TArgs: DeserializeOwned + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(RequestContext, TArgs) -> Result<TResp> + Send + Sync + 'static,
    {
        // ---
        let handler_obj = SyncHandler {
            func: handler,
            _phantom: PhantomData,
        };
        self.handlers.insert(method.into(), Arc::new(handler_obj));
        self
    }

    /// Whether a handler is registered under `method`.
    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Registered method names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Invoke the handler registered under `method`.
    ///
    /// # Errors
    ///
    /// - `RpcError::UnknownMethod` if nothing is registered under `method`
    /// - `RpcError::InvalidArguments` if `args` does not decode
    /// - `RpcError::Handler` if the handler panics
    /// - whatever the handler itself returns
    pub(crate) async fn invoke(
        &self,
        method: &str,
        args: Value,
        ctx: RequestContext,
    ) -> Result<Value> {
        // ---
        let handler = self
            .handlers
            .get(method)
            .cloned()
            .ok_or_else(|| RpcError::UnknownMethod(method.to_string()))?;

        // Sync handlers run inside call(), so it is deferred into the guarded future
        let guarded = AssertUnwindSafe(async move { handler.call(args, ctx).await });
        match guarded.catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => Err(RpcError::Handler(panic_text(&*panic))),
        }
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("methods", &self.names())
            .finish()
    }
}
