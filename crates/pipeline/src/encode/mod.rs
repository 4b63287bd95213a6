//! Encoder subprocess integration.

pub mod rawcooked;

pub use rawcooked::*;
