//! Top-level facade crate for rosgate.
//!
//! Re-exports the core types and the bridge library so users can depend on a
//! single crate.

pub mod core {
    pub use rosgate_core::*;
}

pub mod bridge {
    pub use rosgate_bridge::*;
}
