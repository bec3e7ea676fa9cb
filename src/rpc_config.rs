//! Correlator configuration.
//!
//! This type contains no transport-specific concepts. Transports are owned
//! and configured by the application.

use std::time::Duration;

use crate::{Result, RpcError};

/// Default deadline for outgoing calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Default number of error events buffered per error-channel subscriber.
pub const DEFAULT_ERROR_CHANNEL_CAPACITY: usize = 64;

/// Correlator settings.
///
/// # Example
///
/// ```
/// use peer_rpc::RpcConfig;
/// use std::time::Duration;
///
/// let config = RpcConfig::default().with_request_timeout(Duration::from_secs(2));
/// assert_eq!(config.request_timeout, Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct RpcConfig {
    // ---
    /// Deadline applied to calls that do not carry their own timeout.
    /// Must be non-zero.
    ///
    /// Default: 10 seconds
    pub request_timeout: Duration,

    /// Capacity of the error channel's per-subscriber buffer.
    ///
    /// A subscriber that falls further behind than this loses the oldest
    /// events. Must be non-zero.
    ///
    /// Default: 64
    pub error_channel_capacity: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            error_channel_capacity: DEFAULT_ERROR_CHANNEL_CAPACITY,
        }
    }
}

impl RpcConfig {
    /// Set the default call deadline.
    ///
    /// A zero duration is ignored and leaves the current value in place.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.request_timeout = timeout;
        }
        self
    }

    /// Set the error channel's per-subscriber buffer size.
    pub fn with_error_channel_capacity(mut self, capacity: usize) -> Self {
        self.error_channel_capacity = capacity;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        // ---
        if self.request_timeout.is_zero() {
            return Err(RpcError::Config(
                "request_timeout must be greater than zero".into(),
            ));
        }
        if self.error_channel_capacity == 0 {
            return Err(RpcError::Config(
                "error_channel_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
