//! Decoding capability seams and the raw-RGBA passthrough decoder.
//!
//! Reconstruction uses a one-shot decoder per unit: the factory builds
//! a freshly configured decoder for every unit, so no decode depends on
//! state left behind by a previous one. Only keyframe units are
//! guaranteed self-contained; delta units may legitimately fail to
//! decode standalone.

use blinkcap_capture_engine::encode::{EncodedUnit, RAW_RGBA_MAGIC};
use blinkcap_common::error::{BlinkcapError, BlinkcapResult};

/// One decoded frame: tightly packed RGBA with declared dimensions.
///
/// Dimensions come from the decode result, not from the capture
/// configuration; a codec is free to emit a different resolution.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Abstract interface for a one-shot decoding capability.
#[async_trait::async_trait]
pub trait DecodeService: Send {
    /// Decode a single unit. Standalone delta units may fail; the
    /// caller tolerates this per unit.
    async fn decode(&mut self, unit: &EncodedUnit) -> BlinkcapResult<DecodedImage>;

    /// Release the decoder resource. Idempotent.
    fn close(&mut self);
}

/// Builds a freshly configured decoder per unit.
pub trait DecoderFactory: Send + Sync {
    fn create(&self) -> BlinkcapResult<Box<dyn DecodeService>>;
}

/// Passthrough decoder for units produced by the raw-RGBA encoder.
pub struct RawRgbaDecoder {
    closed: bool,
}

impl RawRgbaDecoder {
    pub fn new() -> Self {
        Self { closed: false }
    }
}

impl Default for RawRgbaDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DecodeService for RawRgbaDecoder {
    async fn decode(&mut self, unit: &EncodedUnit) -> BlinkcapResult<DecodedImage> {
        if self.closed {
            return Err(BlinkcapError::decode("Decoder already closed"));
        }

        let payload = &unit.payload;
        if payload.len() < 12 || &payload[..4] != RAW_RGBA_MAGIC {
            return Err(BlinkcapError::decode("Not a raw-RGBA unit"));
        }
        let width = u32::from_le_bytes(payload[4..8].try_into().expect("4-byte slice"));
        let height = u32::from_le_bytes(payload[8..12].try_into().expect("4-byte slice"));
        let rgba = &payload[12..];
        if rgba.len() != (width as usize) * (height as usize) * 4 {
            return Err(BlinkcapError::decode(format!(
                "Unit payload is {} bytes, expected {} for {}x{}",
                rgba.len(),
                width as usize * height as usize * 4,
                width,
                height
            )));
        }

        Ok(DecodedImage {
            width,
            height,
            rgba: rgba.to_vec(),
        })
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Factory for [`RawRgbaDecoder`] instances.
pub struct RawRgbaDecoderFactory;

impl DecoderFactory for RawRgbaDecoderFactory {
    fn create(&self) -> BlinkcapResult<Box<dyn DecodeService>> {
        Ok(Box::new(RawRgbaDecoder::new()))
    }
}
