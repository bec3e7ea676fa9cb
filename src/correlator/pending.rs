use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::protocol::ResultMessage;
use crate::{CorrelationId, Result, RpcError};

/// Tracks calls waiting for their result.
///
/// Maps ids to oneshot channels. When a result arrives, the channel is used
/// to deliver it to the waiting future. Removing an entry (timeout, failed
/// send, cancellation) drops the sender, so a result that arrives later
/// finds nothing to complete.
///
/// Once closed, the table refuses new registrations; closing drops every
/// sender, which wakes each waiting call with a receive error.
pub(super) struct PendingCalls {
    // ---
    calls: HashMap<CorrelationId, oneshot::Sender<ResultMessage>>,
    closed: bool,
}

impl PendingCalls {
    // ---

    /// Create a new empty table
    pub fn new() -> Self {
        // ---
        Self {
            calls: HashMap::new(),
            closed: false,
        }
    }

    /// Register a new pending call
    ///
    /// Returns a receiver that will be notified when the result arrives.
    ///
    /// # Errors
    ///
    /// - `RpcError::Closed` after [`close`](Self::close)
    /// - `RpcError::DuplicateId` if `id` is already pending
    pub fn register(&mut self, id: CorrelationId) -> Result<oneshot::Receiver<ResultMessage>> {
        // ---
        if self.closed {
            return Err(RpcError::Closed);
        }
        if self.calls.contains_key(&id) {
            return Err(RpcError::DuplicateId(id));
        }

        let (tx, rx) = oneshot::channel();
        self.calls.insert(id, tx);
        Ok(rx)
    }

    /// Complete a pending call with its result
    ///
    /// Returns true if the id was found and the result was delivered.
    pub fn complete(&mut self, id: &CorrelationId, result: ResultMessage) -> bool {
        // ---
        match self.calls.remove(id) {
            // Receiver gone means the caller stopped waiting
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Remove a pending call without delivering a result
    pub fn remove(&mut self, id: &CorrelationId) -> bool {
        // ---
        self.calls.remove(id).is_some()
    }

    /// Refuse further registrations and fail every pending call.
    ///
    /// Returns the number of calls that were pending.
    pub fn close(&mut self) -> usize {
        // ---
        self.closed = true;
        let count = self.calls.len();
        self.calls.clear();
        count
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn ids(&self) -> Vec<CorrelationId> {
        self.calls.keys().cloned().collect()
    }
}
