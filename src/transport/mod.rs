//! Transport implementations.
//!
//! Concrete implementations of the domain-level `Transport` trait. The
//! correlator itself depends only on the trait; applications bring their own
//! transport or use one of these.

pub mod memory;
