//! Correlator builder.
//!
//! Fluent API for configuring a [`Correlator`] with handlers, a default
//! timeout and error-channel sizing.

use crate::{Correlator, HandlerTable, Result, RpcConfig, TransportPtr};
use std::time::Duration;

/// Builder for creating correlator instances.
///
/// Accepts a transport and allows configuration of the handler table,
/// default request timeout, and error channel capacity.
///
/// # Examples
///
/// ```
/// use peer_rpc::{memory, CorrelatorBuilder, HandlerTable, RequestContext};
/// use std::time::Duration;
///
/// # fn example() -> peer_rpc::Result<()> {
/// let (left, _right) = memory::pair();
///
/// let handlers = HandlerTable::new()
///     .register_sync("ping", |_ctx: RequestContext, (): ()| Ok("pong"));
///
/// let peer = CorrelatorBuilder::new(left.transport)
///     .handlers(handlers)
///     .request_timeout(Duration::from_millis(500))
///     .build()?;
///
/// assert_eq!(peer.config().request_timeout, Duration::from_millis(500));
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
pub struct CorrelatorBuilder {
    // ---
    transport: TransportPtr,
    handlers: HandlerTable,

    // Request timeout (optional, default: 10s)
    request_timeout: Option<Duration>,

    // Error channel capacity (optional, default: 64)
    error_channel_capacity: Option<usize>,
}

impl CorrelatorBuilder {
    /// Create a new builder with an empty handler table.
    pub fn new(transport: TransportPtr) -> Self {
        // ---
        Self {
            transport,
            handlers: HandlerTable::new(),
            request_timeout: None,
            error_channel_capacity: None,
        }
    }

    /// Set the table incoming calls are dispatched to.
    pub fn handlers(mut self, handlers: HandlerTable) -> Self {
        self.handlers = handlers;
        self
    }

    /// Set the default call deadline.
    ///
    /// Default: 10s.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the error channel's per-subscriber buffer size.
    ///
    /// Default: 64.
    pub fn error_channel_capacity(mut self, capacity: usize) -> Self {
        self.error_channel_capacity = Some(capacity);
        self
    }

    /// Build the correlator (consumes self).
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Config` if the error channel capacity is zero.
    pub fn build(self) -> Result<Correlator> {
        // ---
        let mut config = RpcConfig::default();

        if let Some(timeout) = self.request_timeout {
            config = config.with_request_timeout(timeout);
        }
        if let Some(capacity) = self.error_channel_capacity {
            config = config.with_error_channel_capacity(capacity);
        }

        Correlator::new(self.transport, self.handlers, config)
    }
}
