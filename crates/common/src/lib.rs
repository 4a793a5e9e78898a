//! Crate includes reusable utils shared by the gateway crates and binaries.
//! Such as initializing the tracing framework and supplying the wall clock.

pub mod clock;
pub mod logging;

// Re-export tracing crate for convenience.
pub use tracing;
