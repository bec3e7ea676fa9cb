//! In-memory transport.
//!
//! A pure in-process link between two correlators, intended for tests,
//! local execution, and as a reference for transport semantics.
//!
//! ## Reference Semantics
//!
//! - Messages sent on one endpoint arrive on the other endpoint's inbox in
//!   send order.
//! - `send()` returns once the message is queued on the link; it waits only
//!   when the link's buffer is full.
//! - Once the receiving inbox is dropped, `send()` fails with a transport
//!   error.
//!
//! ## Non-Goals
//!
//! This transport does not emulate framing, latency or loss of any real
//! channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    // ---
    log_debug,
    Message,
    Result,
    RpcError,
    Transport,
    TransportPtr,
};

/// Default number of messages buffered in each direction.
pub const DEFAULT_LINK_CAPACITY: usize = 64;

static NEXT_LINK: AtomicU64 = AtomicU64::new(1);

/// One side of an in-memory link.
///
/// Hand `transport` to a [`Correlator`](crate::Correlator) and feed `inbox`
/// to [`Correlator::serve`](crate::Correlator::serve).
pub struct MemoryEndpoint {
    // ---
    /// Sends to the opposite endpoint.
    pub transport: TransportPtr,

    /// Messages sent by the opposite endpoint.
    pub inbox: mpsc::Receiver<Message>,
}

/// Sending half of one link direction.
struct MemoryTransport {
    // ---
    name: String,
    outbox: mpsc::Sender<Message>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---

    /// Queue a message for the opposite endpoint.
    async fn send(&self, message: Message) -> Result<()> {
        // ---
        self.outbox.send(message).await.map_err(|_| {
            log_debug!("{}: peer inbox dropped", self.name);
            RpcError::Transport(format!("{}: memory link closed", self.name))
        })
    }
}

/// Create two linked endpoints with the default buffer size.
pub fn pair() -> (MemoryEndpoint, MemoryEndpoint) {
    pair_with_capacity(DEFAULT_LINK_CAPACITY)
}

/// Create two linked endpoints buffering up to `capacity` messages in each
/// direction.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn pair_with_capacity(capacity: usize) -> (MemoryEndpoint, MemoryEndpoint) {
    // ---
    let link = NEXT_LINK.fetch_add(1, Ordering::Relaxed);
    let (left_tx, right_inbox) = mpsc::channel(capacity);
    let (right_tx, left_inbox) = mpsc::channel(capacity);

    log_debug!("memory link {link}: created (capacity {capacity})");

    let left = MemoryEndpoint {
        transport: Arc::new(MemoryTransport {
            name: format!("memory-{link}/left"),
            outbox: left_tx,
        }),
        inbox: left_inbox,
    };
    let right = MemoryEndpoint {
        transport: Arc::new(MemoryTransport {
            name: format!("memory-{link}/right"),
            outbox: right_tx,
        }),
        inbox: right_inbox,
    };

    (left, right)
}
