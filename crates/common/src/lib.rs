//! Blinkcap Common Utilities
//!
//! Shared infrastructure for all Blinkcap crates:
//! - Error types and result aliases
//! - Pattern clock (bit sequence, step timing, keyframe policy)
//! - Capture clock for monotonic frame timestamps
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod pattern;

pub use clock::*;
pub use config::*;
pub use error::*;
pub use pattern::*;
