//! Wire shapes exchanged between peers.
//!
//! Both peers speak the same two message kinds: a call (`"request"`) and its
//! result (`"response"`). The types here are plain structured data; turning
//! them into bytes is left to the transport, with JSON helpers provided for
//! the common case.
mod message;

pub(crate) use message::timeout_millis;

pub use message::{
    // ---
    CallMessage,
    Message,
    ResultMessage,
    STATUS_FAILURE,
    STATUS_SUCCESS,
    SUCCESS_TEXT,
};
