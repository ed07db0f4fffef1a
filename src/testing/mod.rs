//! Testing utilities
//!
//! A scriptable transport engine so the connection lifecycle can be
//! exercised without a broker.

pub mod mocks;

pub use mocks::*;
