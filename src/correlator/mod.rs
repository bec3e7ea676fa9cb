// src/correlator/mod.rs
//! The correlator: one per logical peer connection.
//!
//! # Architecture
//!
//! Outgoing calls get a unique id and a oneshot channel registered in the
//! pending table, then go out through the injected transport. When the
//! application feeds the matching result back through [`Correlator::handle`],
//! the channel is looked up by id and the waiting call is resolved.
//!
//! Incoming calls are dispatched to the local [`HandlerTable`] and the
//! outcome is sent back as a result message.
//!
//! # Concurrency
//!
//! Any number of calls can be in flight. The pending table is protected by a
//! mutex that is only held for map insert/remove and never across an await
//! point, so the correlator is safe to share across tasks and threads.
//!
//! # Errors without a caller
//!
//! Malformed inbound messages and replies that could not be delivered have
//! no pending call to fail. They are published on the error channel (see
//! [`Correlator::errors`]) and logged; `handle` itself never fails.

mod pending;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time;

use pending::PendingCalls;

use crate::protocol::{timeout_millis, CallMessage, Message, ResultMessage};
use crate::{
    // ---
    log_debug,
    log_warn,
    CorrelationId,
    HandlerTable,
    RequestContext,
    Result,
    RpcConfig,
    RpcError,
    TransportPtr,
};

/// Error published on the correlator's error channel.
///
/// Shared because every subscriber receives the same event.
pub type ErrorEvent = Arc<RpcError>;

/// Acquire a mutex guard, intentionally ignoring poisoning.
///
/// The pending table has no invariants spanning multiple entries; the worst
/// outcome of a panic while holding the lock is an unmatched result.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Bidirectional call correlator.
///
/// Cheap to clone (internally `Arc`-backed); clones share the pending table,
/// handler table and error channel.
///
/// # Example
///
/// ```
/// use peer_rpc::{memory, Correlator, HandlerTable, RequestContext, RpcConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> peer_rpc::Result<()> {
/// let (left, right) = memory::pair();
///
/// let server_table = HandlerTable::new()
///     .register("echo", |_ctx: RequestContext, (m,): (String,)| async move { Ok(m) });
///
/// let client = Correlator::new(left.transport, HandlerTable::new(), RpcConfig::default())?;
/// let server = Correlator::new(right.transport, server_table, RpcConfig::default())?;
///
/// let _client_loop = client.serve(left.inbox);
/// let _server_loop = server.serve(right.inbox);
///
/// let reply: String = client.call("echo", ("hi",)).await?;
/// assert_eq!(reply, "hi");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Correlator {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    transport: TransportPtr,
    handlers: HandlerTable,
    config: RpcConfig,
    pending: Mutex<PendingCalls>,
    errors: broadcast::Sender<ErrorEvent>,
}

/// Removes a pending entry when the waiting call goes away.
///
/// Covers failed sends, timeouts and callers dropping the call future.
/// Removal after a successful completion is a no-op.
struct PendingGuard<'a> {
    pending: &'a Mutex<PendingCalls>,
    id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if lock_ignore_poison(self.pending).remove(&self.id) {
            log_debug!("call {} deregistered before completion", self.id);
        }
    }
}

impl Correlator {
    // ---
    /// Create a correlator over `transport`, answering calls from `handlers`.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Config` if `config` is invalid.
    pub fn new(transport: TransportPtr, handlers: HandlerTable, config: RpcConfig) -> Result<Self> {
        // ---
        config.validate()?;

        let (errors, _) = broadcast::channel(config.error_channel_capacity);

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                handlers,
                config,
                pending: Mutex::new(PendingCalls::new()),
                errors,
            }),
        })
    }

    /// Call `method` on the remote peer with the default timeout.
    ///
    /// `args` is the argument list. Tuples and sequences are sent as-is,
    /// `()` as an empty list, and any other value as a one-element list.
    ///
    /// # Errors
    ///
    /// - `RpcError::Remote` if the peer reports a non-zero status (unknown
    ///   method, handler failure, undecodable arguments)
    /// - `RpcError::Timeout` if no result arrives in time
    /// - `RpcError::Transport` if the transport rejects the call
    /// - `RpcError::Serialization` if `args` or the result fails to convert
    /// - `RpcError::Closed` after [`shutdown`](Self::shutdown)
    pub async fn call<TArgs, TResp>(&self, method: &str, args: TArgs) -> Result<TResp>
    where
        TArgs: Serialize,
        TResp: DeserializeOwned,
    {
        // ---
        let call = CallMessage::new(method, pack_args(args)?);
        let value = self.request(call).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Call `method` on the remote peer with an explicit timeout.
    ///
    /// Same as [`call`](Self::call) otherwise.
    pub async fn call_with_timeout<TArgs, TResp>(
        &self,
        method: &str,
        args: TArgs,
        timeout: Duration,
    ) -> Result<TResp>
    where
        TArgs: Serialize,
        TResp: DeserializeOwned,
    {
        // ---
        let call = CallMessage::new(method, pack_args(args)?).with_timeout(timeout);
        let value = self.request(call).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send a call message and wait for its result.
    ///
    /// Lower-level primitive behind [`call`](Self::call). Uses the message's
    /// id if present, else generates one; uses the message's timeout if
    /// present and non-zero, else the configured default. Both are written
    /// into the transmitted message.
    ///
    /// Dropping the returned future cancels the call: its pending entry is
    /// removed and a result arriving later is ignored.
    ///
    /// # Errors
    ///
    /// - `RpcError::DuplicateId` if the supplied id is already pending
    /// - otherwise as for [`call`](Self::call)
    pub async fn request(&self, mut call: CallMessage) -> Result<Value> {
        // ---
        let id = call.id.take().unwrap_or_else(CorrelationId::generate);
        let timeout = call
            .timeout
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(self.inner.config.request_timeout);

        let mut rx = {
            let mut pending = lock_ignore_poison(&self.inner.pending);
            pending.register(id.clone())?
        };
        let _guard = PendingGuard {
            pending: &self.inner.pending,
            id: id.clone(),
        };

        call.id = Some(id.clone());
        call.timeout = Some(timeout_millis(timeout));
        let method = call.name.clone();

        log_debug!("call {id}: {method} (timeout {timeout:?})");

        let transport = &self.inner.transport;
        let outcome = time::timeout(timeout, async {
            transport.send(Message::Request(call)).await?;
            (&mut rx).await.map_err(|_| RpcError::Closed)
        })
        .await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                log_debug!("call {id}: {method} failed: {err}");
                return Err(err);
            }
            Err(_elapsed) => {
                lock_ignore_poison(&self.inner.pending).remove(&id);
                match rx.try_recv() {
                    // Completed between the deadline and the removal
                    Ok(result) => result,
                    _ => {
                        log_warn!("call {id}: {method} timed out after {timeout:?}");
                        return Err(RpcError::Timeout(timeout));
                    }
                }
            }
        };

        result.into_result()
    }

    /// Dispatch one inbound message.
    ///
    /// - Request: run the local handler and send its outcome back.
    /// - Response: resolve the matching pending call; results for unknown or
    ///   abandoned ids are ignored.
    ///
    /// Never fails. Problems with no pending call to fail are published on
    /// the error channel.
    pub async fn handle(&self, message: Message) {
        // ---
        match message {
            Message::Request(call) => self.dispatch(call).await,
            Message::Response(result) => self.route_response(result),
        }
    }

    /// Decode an untyped JSON message and dispatch it.
    ///
    /// Undecodable messages are reported on the error channel.
    pub async fn handle_value(&self, value: Value) {
        // ---
        match Message::from_value(value) {
            Ok(message) => self.handle(message).await,
            Err(err) => self.report(err),
        }
    }

    /// Decode a JSON-encoded message and dispatch it.
    ///
    /// Undecodable messages are reported on the error channel.
    pub async fn handle_json(&self, bytes: &[u8]) {
        // ---
        match Message::from_json(bytes) {
            Ok(message) => self.handle(message).await,
            Err(err) => self.report(err),
        }
    }

    /// Send a result message to the remote peer.
    ///
    /// # Errors
    ///
    /// - `RpcError::Protocol` if the result carries no id
    /// - the transport's error if delivery fails
    pub async fn response(&self, result: ResultMessage) -> Result<()> {
        // ---
        if result.id.is_none() {
            return Err(RpcError::Protocol(format!(
                "response without id: {}",
                result.name
            )));
        }
        self.inner.transport.send(Message::Response(result)).await
    }

    /// Subscribe to the error channel.
    ///
    /// Receives every error that had no pending call to fail: malformed
    /// inbound messages and replies the transport could not deliver. Events
    /// published while nobody is subscribed are only logged.
    pub fn errors(&self) -> broadcast::Receiver<ErrorEvent> {
        self.inner.errors.subscribe()
    }

    /// Spawn a receive loop feeding `inbox` into [`handle`](Self::handle).
    ///
    /// Responses are routed inline in arrival order. Each request runs in
    /// its own task so a slow handler does not hold up later messages,
    /// including results for calls the handler itself makes.
    ///
    /// The loop ends when the inbox closes or every other handle to this
    /// correlator has been dropped.
    pub fn serve(&self, mut inbox: mpsc::Receiver<Message>) -> JoinHandle<()> {
        // ---
        let weak = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            // ---
            while let Some(message) = inbox.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let correlator = Correlator { inner };

                if message.is_request() {
                    tokio::spawn(async move { correlator.handle(message).await });
                } else {
                    correlator.handle(message).await;
                }
            }
            log_debug!("receive loop stopped");
        })
    }

    /// Fail every pending call with `RpcError::Closed` and refuse new ones.
    ///
    /// Inbound messages are still dispatched; results for the failed calls
    /// are ignored. Idempotent.
    pub fn shutdown(&self) {
        // ---
        let failed = lock_ignore_poison(&self.inner.pending).close();
        if failed > 0 {
            log_debug!("shutdown: failed {failed} pending call(s)");
        }
    }

    pub fn is_closed(&self) -> bool {
        lock_ignore_poison(&self.inner.pending).is_closed()
    }

    /// Number of calls currently waiting for a result.
    pub fn pending_count(&self) -> usize {
        lock_ignore_poison(&self.inner.pending).len()
    }

    /// Ids of the calls currently waiting for a result.
    pub fn pending_ids(&self) -> Vec<CorrelationId> {
        lock_ignore_poison(&self.inner.pending).ids()
    }

    /// The handler table this correlator answers calls from.
    pub fn handlers(&self) -> &HandlerTable {
        &self.inner.handlers
    }

    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    async fn dispatch(&self, call: CallMessage) {
        // ---
        let Some(id) = call.id else {
            self.report(RpcError::Protocol(format!(
                "request without id: {}",
                call.name
            )));
            return;
        };
        let method = call.name;

        let ctx = RequestContext::new(id.clone(), method.clone(), self.clone());
        let outcome = self.inner.handlers.invoke(&method, call.data, ctx).await;
        let reply = match outcome {
            Ok(value) => ResultMessage::success(id, method, value),
            Err(err) => {
                log_debug!("call {id}: {method} failed locally: {err}");
                ResultMessage::failure(id, method, err.to_string())
            }
        };

        if let Err(err) = self.response(reply).await {
            self.report(err);
        }
    }

    fn route_response(&self, result: ResultMessage) {
        // ---
        let Some(id) = result.id.clone() else {
            self.report(RpcError::Protocol(format!(
                "bad request:response without id ({})",
                result.name
            )));
            return;
        };

        let delivered = lock_ignore_poison(&self.inner.pending).complete(&id, result);
        if !delivered {
            log_debug!("no pending call for id {id}; result ignored");
        }
    }

    fn report(&self, err: RpcError) {
        // ---
        log_warn!("rpc error: {err}");
        // No subscribers is fine
        let _ = self.inner.errors.send(Arc::new(err));
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("handlers", &self.inner.handlers)
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Turn a caller's argument value into a wire argument list.
fn pack_args<T: Serialize>(args: T) -> Result<Value> {
    // ---
    Ok(match serde_json::to_value(args)? {
        Value::Null => Value::Array(Vec::new()),
        list @ Value::Array(_) => list,
        single => Value::Array(vec![single]),
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::transport_fn;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Correlator whose outgoing messages land in a channel.
    fn capture(config: RpcConfig, handlers: HandlerTable) -> (Correlator, UnboundedReceiver<Message>) {
        // ---
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = transport_fn(move |message| {
            let tx = tx.clone();
            async move { tx.send(message).map_err(RpcError::transport) }
        });
        (Correlator::new(transport, handlers, config).unwrap(), rx)
    }

    #[test]
    fn test_pack_args() {
        // ---
        assert_eq!(pack_args(()).unwrap(), json!([]));
        assert_eq!(pack_args(("a", 1)).unwrap(), json!(["a", 1]));
        assert_eq!(pack_args("solo").unwrap(), json!(["solo"]));
        assert_eq!(pack_args(vec![1, 2]).unwrap(), json!([1, 2]));
    }

    #[tokio::test]
    async fn test_request_fills_id_and_timeout() {
        // ---
        let config = RpcConfig::default().with_request_timeout(Duration::from_millis(1234));
        let (peer, mut sent) = capture(config, HandlerTable::new());

        let call = tokio::spawn({
            let peer = peer.clone();
            async move { peer.request(CallMessage::new("echo", json!(["x"]))).await }
        });

        let Some(Message::Request(out)) = sent.recv().await else {
            panic!("expected a request");
        };
        assert_eq!(out.timeout, Some(1234));
        let id = out.id.clone().expect("id filled in");
        assert_eq!(peer.pending_ids(), vec![id.clone()]);

        peer.handle(Message::Response(ResultMessage::success(id, "echo", json!("x"))))
            .await;

        assert_eq!(call.await.unwrap().unwrap(), json!("x"));
        assert_eq!(peer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_millisecond_timeout_is_honoured() {
        // ---
        let (peer, mut sent) = capture(RpcConfig::default(), HandlerTable::new());

        let started = time::Instant::now();
        let err = peer
            .call_with_timeout::<_, Value>("never", (), Duration::from_micros(500))
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Timeout(d) if d == Duration::from_millis(1)));
        assert!(started.elapsed() < Duration::from_millis(10));
        assert_eq!(peer.pending_count(), 0);

        let Some(Message::Request(out)) = sent.recv().await else {
            panic!("expected a request");
        };
        assert_eq!(out.timeout, Some(1));
    }

    #[tokio::test]
    async fn test_remote_failure_maps_to_error() {
        // ---
        let (peer, mut sent) = capture(RpcConfig::default(), HandlerTable::new());

        let call = tokio::spawn({
            let peer = peer.clone();
            async move { peer.call::<_, Value>("boom", ()).await }
        });

        let id = sent.recv().await.and_then(|m| m.id().cloned()).unwrap();
        peer.handle(Message::Response(ResultMessage {
            id: Some(id),
            name: "boom".into(),
            data: Value::Null,
            code: 7,
            message: "exploded".into(),
        }))
        .await;

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "exploded (7)");
        assert_eq!(err.remote_code(), Some(7));
    }

    #[tokio::test]
    async fn test_transport_failure_fails_call() {
        // ---
        let transport = transport_fn(|_message| async { Err(RpcError::transport("link down")) });
        let peer = Correlator::new(transport, HandlerTable::new(), RpcConfig::default()).unwrap();

        let err = peer.call::<_, Value>("echo", ("x",)).await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(ref m) if m == "link down"));
        assert_eq!(peer.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_caller_id() {
        // ---
        let (peer, _sent) = capture(RpcConfig::default(), HandlerTable::new());

        let first = tokio::spawn({
            let peer = peer.clone();
            async move {
                peer.request(CallMessage::new("slow", json!([])).with_id("same"))
                    .await
            }
        });
        tokio::task::yield_now().await;
        while peer.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        let err = peer
            .request(CallMessage::new("slow", json!([])).with_id("same"))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::DuplicateId(_)));

        first.abort();
    }

    #[tokio::test]
    async fn test_dispatch_unknown_method() {
        // ---
        let (peer, mut sent) = capture(RpcConfig::default(), HandlerTable::new());

        peer.handle(Message::Request(
            CallMessage::new("missingMethod", json!([])).with_id("r-1"),
        ))
        .await;

        let Some(Message::Response(reply)) = sent.recv().await else {
            panic!("expected a response");
        };
        assert_eq!(reply.id, Some(CorrelationId::from("r-1")));
        assert_eq!(reply.name, "missingMethod");
        assert_eq!(reply.code, -1);
        assert_eq!(reply.message, "unknown method:missingMethod");
        assert_eq!(reply.data, Value::Null);
    }

    #[tokio::test]
    async fn test_dispatch_success_and_failure() {
        // ---
        let table = HandlerTable::new()
            .register_sync("double", |_ctx, (n,): (i64,)| Ok(n * 2))
            .register("fail", |_ctx, (): ()| async move {
                Err::<(), _>(RpcError::handler("no luck"))
            });
        let (peer, mut sent) = capture(RpcConfig::default(), table);

        peer.handle(Message::Request(CallMessage::new("double", json!([21])).with_id("a")))
            .await;
        peer.handle(Message::Request(CallMessage::new("fail", json!([])).with_id("b")))
            .await;

        let Some(Message::Response(ok)) = sent.recv().await else {
            panic!("expected a response");
        };
        assert_eq!((ok.code, ok.message.as_str(), ok.data), (0, "success", json!(42)));

        let Some(Message::Response(failed)) = sent.recv().await else {
            panic!("expected a response");
        };
        assert_eq!((failed.code, failed.message.as_str()), (-1, "no luck"));
    }

    #[tokio::test]
    async fn test_dispatch_panicking_handler() {
        // ---
        let table = HandlerTable::new()
            .register_sync("boom", |_ctx, (): ()| -> Result<()> { panic!("kaboom") })
            .register("boom_async", |_ctx, (): ()| async move {
                if true {
                    panic!("async kaboom");
                }
                Ok(())
            });
        let (peer, mut sent) = capture(RpcConfig::default(), table);

        peer.handle(Message::Request(CallMessage::new("boom", json!([])).with_id("s")))
            .await;
        peer.handle(Message::Request(CallMessage::new("boom_async", json!([])).with_id("a")))
            .await;

        let Some(Message::Response(sync_reply)) = sent.recv().await else {
            panic!("expected a response");
        };
        assert_eq!(sync_reply.code, -1);
        assert_eq!(sync_reply.message, "panic in handler: kaboom");

        let Some(Message::Response(async_reply)) = sent.recv().await else {
            panic!("expected a response");
        };
        assert_eq!(async_reply.id, Some(CorrelationId::from("a")));
        assert_eq!(async_reply.message, "panic in handler: async kaboom");
    }

    #[tokio::test]
    async fn test_dispatch_bad_arguments() {
        // ---
        let table = HandlerTable::new().register_sync("double", |_ctx, (n,): (i64,)| Ok(n * 2));
        let (peer, mut sent) = capture(RpcConfig::default(), table);

        peer.handle(Message::Request(
            CallMessage::new("double", json!(["not a number"])).with_id("a"),
        ))
        .await;

        let Some(Message::Response(reply)) = sent.recv().await else {
            panic!("expected a response");
        };
        assert_eq!(reply.code, -1);
        assert!(reply.message.starts_with("invalid arguments"));
    }

    #[tokio::test]
    async fn test_malformed_messages_reported() {
        // ---
        let (peer, mut sent) = capture(RpcConfig::default(), HandlerTable::new());
        let mut errors = peer.errors();

        peer.handle_value(json!({"name": "x"})).await;
        peer.handle_json(b"{broken").await;
        peer.handle(Message::Response(ResultMessage {
            id: None,
            name: "x".into(),
            data: Value::Null,
            code: 0,
            message: "success".into(),
        }))
        .await;
        peer.handle(Message::Request(CallMessage::new("x", json!([]))))
            .await;

        for _ in 0..4 {
            let event = errors.try_recv().expect("error event");
            assert!(matches!(*event, RpcError::Protocol(_)));
        }
        assert!(errors.try_recv().is_err());
        assert!(sent.try_recv().is_err(), "nothing sent for malformed input");
    }

    #[tokio::test]
    async fn test_failed_reply_reported() {
        // ---
        let transport = transport_fn(|_message| async { Err(RpcError::transport("gone")) });
        let table = HandlerTable::new().register_sync("ping", |_ctx, (): ()| Ok("pong"));
        let peer = Correlator::new(transport, table, RpcConfig::default()).unwrap();
        let mut errors = peer.errors();

        peer.handle(Message::Request(CallMessage::new("ping", json!([])).with_id("p")))
            .await;

        let event = errors.try_recv().expect("error event");
        assert!(matches!(*event, RpcError::Transport(_)));
    }

    #[tokio::test]
    async fn test_response_requires_id() {
        // ---
        let (peer, _sent) = capture(RpcConfig::default(), HandlerTable::new());
        let mut result = ResultMessage::success("x".into(), "echo", Value::Null);
        result.id = None;

        assert!(matches!(
            peer.response(result).await,
            Err(RpcError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending() {
        // ---
        let (peer, mut sent) = capture(RpcConfig::default(), HandlerTable::new());

        let call = tokio::spawn({
            let peer = peer.clone();
            async move { peer.call::<_, Value>("slow", ()).await }
        });
        let _ = sent.recv().await;

        peer.shutdown();

        assert!(matches!(call.await.unwrap(), Err(RpcError::Closed)));
        assert!(peer.is_closed());
        assert!(matches!(
            peer.call::<_, Value>("slow", ()).await,
            Err(RpcError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_zero_error_capacity_rejected() {
        // ---
        let config = RpcConfig::default().with_error_channel_capacity(0);
        let transport = transport_fn(|_message| async { Ok(()) });
        assert!(matches!(
            Correlator::new(transport, HandlerTable::new(), config),
            Err(RpcError::Config(_))
        ));
    }
}
