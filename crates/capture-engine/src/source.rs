//! Live frame sources.
//!
//! The capture scheduler polls a [`FrameSource`] once per tick. The
//! production camera source lives behind the `gst` feature in
//! [`crate::gst`]; the synthetic source here generates test-pattern
//! frames so the full pipeline runs without camera hardware.

use blinkcap_common::error::BlinkcapResult;

/// Negotiated (or not-yet-known) source resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceDimensions {
    pub width: u32,
    pub height: u32,
}

impl SourceDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A source that has not finished warming up reports zero
    /// dimensions; the session applies its grace-retry policy.
    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// One raw captured frame. Pixel data is tightly packed RGBA.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture timestamp in microseconds since session start.
    pub timestamp_us: u64,
}

/// Abstract interface for a live camera capability.
///
/// Lifecycle: `acquire` once, then `pull_frame` once per tick, then
/// `release`. `dimensions` may be called between acquire and the first
/// pull and is allowed to re-probe the device.
#[async_trait::async_trait]
pub trait FrameSource: Send {
    /// Open the device / stream. Failure here is fatal to session start.
    async fn acquire(&mut self) -> BlinkcapResult<()>;

    /// Current stream resolution; zero while the stream is warming up.
    async fn dimensions(&mut self) -> SourceDimensions;

    /// Pull exactly one frame, stamped with the given capture timestamp.
    async fn pull_frame(&mut self, timestamp_us: u64) -> BlinkcapResult<RawFrame>;

    /// Release the device. Must be safe to call after a failed acquire.
    async fn release(&mut self);
}

/// Synthetic frame source producing a moving gradient.
///
/// `warmup_probes` dimension calls report 0x0 before the real
/// resolution appears, which exercises the session's grace-retry and
/// fallback-resolution policy in tests and demos.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    warmup_probes: u32,
    probes_seen: u32,
    frames_pulled: u64,
    acquired: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            warmup_probes: 0,
            probes_seen: 0,
            frames_pulled: 0,
            acquired: false,
        }
    }

    /// Report zero dimensions for the first `probes` dimension calls.
    pub fn with_warmup_probes(mut self, probes: u32) -> Self {
        self.warmup_probes = probes;
        self
    }

    pub fn frames_pulled(&self) -> u64 {
        self.frames_pulled
    }

    fn fill_gradient(&self, data: &mut [u8]) {
        let shift = (self.frames_pulled % 256) as u32;
        for y in 0..self.height {
            for x in 0..self.width {
                let i = ((y * self.width + x) * 4) as usize;
                data[i] = ((x + shift) % 256) as u8;
                data[i + 1] = ((y + shift) % 256) as u8;
                data[i + 2] = ((x + y) % 256) as u8;
                data[i + 3] = 0xff;
            }
        }
    }
}

#[async_trait::async_trait]
impl FrameSource for SyntheticSource {
    async fn acquire(&mut self) -> BlinkcapResult<()> {
        self.acquired = true;
        tracing::debug!(width = self.width, height = self.height, "Synthetic source acquired");
        Ok(())
    }

    async fn dimensions(&mut self) -> SourceDimensions {
        if self.probes_seen < self.warmup_probes {
            self.probes_seen += 1;
            return SourceDimensions::new(0, 0);
        }
        SourceDimensions::new(self.width, self.height)
    }

    async fn pull_frame(&mut self, timestamp_us: u64) -> BlinkcapResult<RawFrame> {
        let mut data = vec![0u8; (self.width * self.height * 4) as usize];
        self.fill_gradient(&mut data);
        self.frames_pulled += 1;
        Ok(RawFrame {
            data,
            width: self.width,
            height: self.height,
            timestamp_us,
        })
    }

    async fn release(&mut self) {
        self.acquired = false;
    }
}
