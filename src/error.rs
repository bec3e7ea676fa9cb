use std::time::Duration;

use thiserror::Error;

use crate::CorrelationId;

/// Errors that can occur while issuing, dispatching or correlating calls.
///
/// Errors tied to a specific outstanding call are returned from that call's
/// future. Errors with no call to fail (malformed inbound messages, failed
/// replies) are published on the correlator's error channel instead.
#[derive(Error, Debug)]
pub enum RpcError {
    /// No result arrived before the call's deadline.
    #[error("Timeout:{}", .0.as_millis())]
    Timeout(Duration),

    /// The transport reported a delivery failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote peer answered with a non-zero status code.
    #[error("{message} ({code})")]
    Remote { code: i64, message: String },

    /// An inbound message had no recognizable request/response shape.
    #[error("{0}")]
    Protocol(String),

    /// No local handler is registered under the requested method name.
    #[error("unknown method:{0}")]
    UnknownMethod(String),

    /// Failure raised by an application handler.
    ///
    /// Displays as the bare text so the remote caller sees exactly what the
    /// handler reported.
    #[error("{0}")]
    Handler(String),

    /// The argument payload could not be decoded into the handler's
    /// parameter types.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// A caller-supplied id is already in use by a pending call.
    #[error("duplicate call id: {0}")]
    DuplicateId(CorrelationId),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The correlator has been shut down.
    #[error("correlator closed")]
    Closed,

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RpcError {
    /// Build a handler failure from anything printable.
    ///
    /// ```
    /// let err = peer_rpc::RpcError::handler("disk full");
    /// assert_eq!(err.to_string(), "disk full");
    /// ```
    pub fn handler(message: impl std::fmt::Display) -> Self {
        RpcError::Handler(message.to_string())
    }

    /// Build a transport failure from anything printable.
    pub fn transport(message: impl std::fmt::Display) -> Self {
        RpcError::Transport(message.to_string())
    }

    /// `true` for the error produced when a call's deadline elapses.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout(_))
    }

    /// Status code carried by a remote failure, if any.
    pub fn remote_code(&self) -> Option<i64> {
        match self {
            RpcError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type alias for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;
