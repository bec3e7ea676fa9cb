//! Transport-agnostic bidirectional RPC correlation.
//!
//! Two peers connected by any message-passing channel invoke named methods on
//! each other and receive results asynchronously. This crate provides the
//! correlation engine: id generation, pending-call tracking, timeouts, method
//! dispatch and status-code mapping. Moving messages is left to a
//! [`Transport`] supplied by the application.
//!
//! - [`Correlator::call`] issues a call and resolves with the remote
//!   handler's return value.
//! - [`Correlator::handle`] consumes every inbound message: calls are
//!   dispatched to the local [`HandlerTable`], results complete pending calls.
//! - [`Correlator::errors`] reports problems that have no caller to fail.
//!

// Import all sub modules once...
mod correlation;
mod correlator;
mod correlator_builder;
mod domain;
mod error;
mod handler;
mod macros;
mod protocol;
mod rpc_config;
mod transport;

#[allow(unused_imports)]
pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use correlator::{Correlator, ErrorEvent};
pub use correlator_builder::CorrelatorBuilder;
pub use handler::{HandlerTable, RequestContext};

pub use rpc_config::{RpcConfig, DEFAULT_ERROR_CHANNEL_CAPACITY, DEFAULT_REQUEST_TIMEOUT};

pub use correlation::CorrelationId;
pub use error::{Result, RpcError};

pub use protocol::{
    // ---
    CallMessage,
    Message,
    ResultMessage,
    STATUS_FAILURE,
    STATUS_SUCCESS,
    SUCCESS_TEXT,
};

// --- public re-exports
pub use domain::{
    //
    transport_fn,
    Transport,
    TransportPtr,
};

pub use transport::memory;
