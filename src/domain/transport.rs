// src/domain/transport.rs

//! Transport domain abstraction.
//!
//! The correlator never moves bytes itself. It hands every outgoing message
//! to a [`Transport`] supplied by the application and relies on the
//! application to feed inbound messages back through
//! [`Correlator::handle`](crate::Correlator::handle).
//!
//! The transport is responsible only for delivery. Correlation, timeouts and
//! dispatch are handled by the correlator.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::{Message, Result};

/// Outbound half of a peer connection.
///
/// Implementations must ensure that:
/// - `send()` returns `Ok(())` once the message has been accepted for
///   delivery, and an error if delivery failed.
/// - `send()` does not wait for the remote peer to *answer*; the answer
///   arrives later as a separate inbound message.
///
/// The correlator never retries a failed send.
///
/// # Notes
///
/// This trait uses `async_trait`; consumers should treat `send` as a normal
/// `async fn`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Deliver one message to the remote peer.
    async fn send(&self, message: Message) -> Result<()>;
}

/// Shared transport pointer.
///
/// `.clone()` is cheap and every clone refers to the same connection.
pub type TransportPtr = Arc<dyn Transport>;

/// Transport backed by a plain async closure.
struct FnTransport<F, Fut> {
    // ---
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

#[async_trait::async_trait]
impl<F, Fut> Transport for FnTransport<F, Fut>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn send(&self, message: Message) -> Result<()> {
        (self.func)(message).await
    }
}

/// Wrap a send function as a transport.
///
/// # Example
///
/// ```
/// use peer_rpc::{transport_fn, Message};
/// use tokio::sync::mpsc;
///
/// let (tx, _rx) = mpsc::unbounded_channel::<Message>();
/// let transport = transport_fn(move |message| {
///     let tx = tx.clone();
///     async move { tx.send(message).map_err(peer_rpc::RpcError::transport) }
/// });
/// # drop(transport);
/// ```
pub fn transport_fn<F, Fut>(func: F) -> TransportPtr
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    // ---
    Arc::new(FnTransport {
        func,
        _phantom: PhantomData,
    })
}
