//! Reconstruction: turn buffered encoded units back into still images.
//!
//! Each unit decodes independently through a one-shot decoder. A unit
//! that cannot be decoded (standalone delta, corrupt payload, no
//! decoder capability) yields an explicit undecodable marker for its
//! index; the batch never aborts. Output pairs come back in input
//! order regardless of per-unit latency or failure.

use std::io::Cursor;

use blinkcap_capture_engine::encode::EncodedUnit;
use blinkcap_common::error::{BlinkcapError, BlinkcapResult};

use crate::decode::{DecodedImage, DecoderFactory};

/// A reconstructed frame stored as an encoded PNG blob. The decoded
/// pixel buffer itself is transient; only this representation is kept.
#[derive(Debug, Clone)]
pub struct StillImage {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

/// Result of reconstructing one unit.
#[derive(Debug, Clone)]
pub enum MaterializeOutcome {
    Image(StillImage),
    /// The unit could not be decoded; siblings are unaffected.
    Undecodable { reason: String },
}

impl MaterializeOutcome {
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image(_))
    }
}

/// Reconstruction pipeline over a decoder capability.
pub struct Materializer<F: DecoderFactory> {
    factory: F,
}

impl<F: DecoderFactory> Materializer<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    /// Begin reconstructing the given units. The returned batch yields
    /// `(index, outcome)` pairs lazily, in input order. Restarting
    /// means calling `materialize` again over the same units.
    pub fn materialize<'a>(&'a self, units: &'a [EncodedUnit]) -> MaterializeBatch<'a> {
        MaterializeBatch {
            factory: &self.factory,
            units,
            next_index: 0,
        }
    }
}

/// Lazy, finite, order-preserving sequence of reconstruction results.
pub struct MaterializeBatch<'a> {
    factory: &'a dyn DecoderFactory,
    units: &'a [EncodedUnit],
    next_index: usize,
}

impl<'a> MaterializeBatch<'a> {
    /// Reconstruct the next unit, or `None` when the batch is done.
    pub async fn next(&mut self) -> Option<(usize, MaterializeOutcome)> {
        let index = self.next_index;
        let unit = self.units.get(index)?;
        self.next_index += 1;

        let outcome = match self.decode_one(unit).await {
            Ok(image) => match encode_png(&image) {
                Ok(still) => MaterializeOutcome::Image(still),
                Err(e) => {
                    tracing::warn!(index, error = %e, "Failed to encode still image");
                    MaterializeOutcome::Undecodable {
                        reason: e.to_string(),
                    }
                }
            },
            Err(e) => {
                tracing::debug!(index, error = %e, "Unit did not decode standalone");
                MaterializeOutcome::Undecodable {
                    reason: e.to_string(),
                }
            }
        };
        Some((index, outcome))
    }

    /// Drain the whole batch.
    pub async fn collect(mut self) -> Vec<(usize, MaterializeOutcome)> {
        let mut results = Vec::with_capacity(self.units.len());
        while let Some(pair) = self.next().await {
            results.push(pair);
        }
        results
    }

    /// One-shot decode: fresh decoder per unit, closed immediately.
    async fn decode_one(&self, unit: &EncodedUnit) -> BlinkcapResult<DecodedImage> {
        let mut decoder = self.factory.create()?;
        let result = decoder.decode(unit).await;
        decoder.close();
        result
    }
}

/// Encode a decoded RGBA frame as PNG.
fn encode_png(image: &DecodedImage) -> BlinkcapResult<StillImage> {
    let buffer = image::RgbaImage::from_raw(image.width, image.height, image.rgba.clone())
        .ok_or_else(|| {
            BlinkcapError::render(format!(
                "Decoder returned {} bytes for a {}x{} frame",
                image.rgba.len(),
                image.width,
                image.height
            ))
        })?;

    let mut png = Vec::new();
    buffer
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| BlinkcapError::render(format!("PNG encode failed: {e}")))?;

    Ok(StillImage {
        width: image.width,
        height: image.height,
        png,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{DecodeService, RawRgbaDecoderFactory};
    use blinkcap_capture_engine::encode::{RAW_RGBA_MAGIC, UnitKind};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn raw_unit(width: u32, height: u32, kind: UnitKind) -> EncodedUnit {
        let mut payload = Vec::new();
        payload.extend_from_slice(RAW_RGBA_MAGIC);
        payload.extend_from_slice(&width.to_le_bytes());
        payload.extend_from_slice(&height.to_le_bytes());
        payload.extend_from_slice(&vec![0x40; (width * height * 4) as usize]);
        EncodedUnit {
            payload,
            timestamp_us: 0,
            kind,
        }
    }

    fn bad_unit() -> EncodedUnit {
        EncodedUnit {
            payload: vec![0xde, 0xad],
            timestamp_us: 0,
            kind: UnitKind::Delta,
        }
    }

    #[tokio::test]
    async fn preserves_input_order_with_mixed_outcomes() {
        let units = vec![
            raw_unit(4, 4, UnitKind::Key),
            bad_unit(),
            raw_unit(4, 4, UnitKind::Delta),
        ];
        let materializer = Materializer::new(RawRgbaDecoderFactory);
        let results = materializer.materialize(&units).collect().await;

        let indices: Vec<usize> = results.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(results[0].1.is_image());
        assert!(!results[1].1.is_image());
        assert!(results[2].1.is_image());
    }

    #[tokio::test]
    async fn dimensions_come_from_the_decode_result() {
        // The unit declares its own resolution; nothing about the
        // original capture configuration is consulted.
        let units = vec![raw_unit(16, 9, UnitKind::Key)];
        let materializer = Materializer::new(RawRgbaDecoderFactory);
        let results = materializer.materialize(&units).collect().await;

        match &results[0].1 {
            MaterializeOutcome::Image(still) => {
                assert_eq!((still.width, still.height), (16, 9));
                // PNG signature.
                assert_eq!(&still.png[..8], &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);
            }
            MaterializeOutcome::Undecodable { reason } => {
                panic!("expected an image, got undecodable: {reason}")
            }
        }
    }

    /// Factory whose creation always fails, as when the decode
    /// capability is entirely unavailable.
    struct UnavailableFactory;

    impl DecoderFactory for UnavailableFactory {
        fn create(&self) -> BlinkcapResult<Box<dyn DecodeService>> {
            Err(BlinkcapError::platform("no decoder capability"))
        }
    }

    #[tokio::test]
    async fn missing_decoder_capability_degrades_per_unit() {
        let units = vec![raw_unit(4, 4, UnitKind::Key), raw_unit(4, 4, UnitKind::Delta)];
        let materializer = Materializer::new(UnavailableFactory);
        let results = materializer.materialize(&units).collect().await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, outcome)| !outcome.is_image()));
    }

    /// Factory that counts how many decoders it built.
    struct CountingFactory {
        created: Arc<AtomicU32>,
    }

    impl DecoderFactory for CountingFactory {
        fn create(&self) -> BlinkcapResult<Box<dyn DecodeService>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(crate::decode::RawRgbaDecoder::new()))
        }
    }

    #[tokio::test]
    async fn uses_a_fresh_decoder_per_unit() {
        let created = Arc::new(AtomicU32::new(0));
        let units = vec![
            raw_unit(4, 4, UnitKind::Key),
            raw_unit(4, 4, UnitKind::Delta),
            raw_unit(4, 4, UnitKind::Delta),
        ];
        let materializer = Materializer::new(CountingFactory {
            created: created.clone(),
        });
        let _ = materializer.materialize(&units).collect().await;
        assert_eq!(created.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn batch_is_lazy_and_finite() {
        let units = vec![raw_unit(4, 4, UnitKind::Key)];
        let materializer = Materializer::new(RawRgbaDecoderFactory);
        let mut batch = materializer.materialize(&units);

        assert!(batch.next().await.is_some());
        assert!(batch.next().await.is_none());
        assert!(batch.next().await.is_none());
    }
}
