//! Domain layer public interface.
//!
//! Abstractions here are independent of any concrete transport. All
//! consumers import symbols via this module, not by referencing individual
//! files directly.

mod transport;

// --- Transport domain re-exports ---

pub use transport::{
    //
    transport_fn,
    Transport,
    TransportPtr,
};
