//! Streaming three-argument calls over fragmented, checksummed frames.
//!
//! # Crate Structure
//!
//! - [`frame`]: Fixed-header wire frames, frame pools and typed buffers
//! - [`call`]: Argument streaming, message exchanges and connection routing
//! - [`logging`]: `tracing` subscriber setup for binaries and tests

pub mod logging;

/// Re-export frame types.
pub mod frame {
    pub use argwire_frame::*;
}

/// Re-export call types.
pub mod call {
    pub use argwire_call::*;
}
