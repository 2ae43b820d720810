//! Blinkcap Render Engine
//!
//! Reconstructs buffered encoded units into viewable still images.
//! Runs entirely outside the timed capture loop: every unit decodes
//! independently through a one-shot decoder, failures degrade per unit
//! rather than per batch, and output order always matches input order.

pub mod decode;
pub mod materialize;

#[cfg(feature = "gst")]
pub mod gst;

pub use decode::*;
pub use materialize::*;
