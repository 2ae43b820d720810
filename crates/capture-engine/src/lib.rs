//! Blinkcap Capture Engine
//!
//! Drives the timed signaling loop: flip the visual signal per the
//! pattern clock, settle, pull one camera frame, and forward it to the
//! encode pipeline with its keyframe hint.
//!
//! # Architecture
//!
//! ```text
//! PatternClock ──ticks──► CaptureSession
//!                           │  set_signal        SignalSink
//!                           │  pull_frame        FrameSource
//!                           ▼
//!                        EncodePipeline ──► Vec<EncodedUnit>
//!                        (submission-order reassembly)
//! ```
//!
//! Camera and codec capabilities are trait seams; production GStreamer
//! backends live behind the `gst` feature, synthetic backends are
//! always available.

pub mod encode;
pub mod session;
pub mod sink;
pub mod source;

#[cfg(feature = "gst")]
pub mod gst;

pub use encode::*;
pub use session::*;
pub use sink::*;
pub use source::*;
