//! Encode pipeline: capability trait, ordered unit buffering, and the
//! raw-RGBA passthrough encoder.
//!
//! The underlying encoder completes asynchronously, so completions can
//! arrive out of submission order. Decode-by-transition-boundary only
//! works if the unit buffer is in submission order, so the pipeline
//! reassembles: every submission enqueues a completion channel, and
//! units move into the buffer strictly from the front of that queue.

use std::collections::VecDeque;

use blinkcap_common::error::{BlinkcapError, BlinkcapResult};
use tokio::sync::oneshot;

use crate::source::RawFrame;

/// Whether a unit is self-contained or depends on its predecessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Key,
    Delta,
}

/// One encoded output unit.
#[derive(Debug, Clone)]
pub struct EncodedUnit {
    pub payload: Vec<u8>,
    /// Capture timestamp, microseconds since session start.
    pub timestamp_us: u64,
    pub kind: UnitKind,
}

/// Encoder configuration, fixed for the whole session.
#[derive(Debug, Clone, Copy)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub framerate: u32,
}

/// Completion channel for one submitted frame.
pub type EncodeCompletion = oneshot::Receiver<BlinkcapResult<EncodedUnit>>;

/// Abstract interface for an encoding capability.
#[async_trait::async_trait]
pub trait EncodeService: Send {
    /// Configure the codec. Called once per session, before any encode.
    fn configure(&mut self, config: &EncoderConfig) -> BlinkcapResult<()>;

    /// Submit one frame. The returned channel resolves when the codec
    /// emits the corresponding unit, possibly out of submission order.
    fn encode(&mut self, frame: RawFrame, key_frame: bool) -> BlinkcapResult<EncodeCompletion>;

    /// Drain the codec's internal queue.
    async fn flush(&mut self) -> BlinkcapResult<()>;

    /// Release the codec resource. Idempotent; swallows errors.
    fn close(&mut self);
}

/// Orders asynchronous encoder completions back into submission order
/// and buffers the resulting units for the session.
pub struct EncodePipeline {
    service: Box<dyn EncodeService>,
    pending: VecDeque<EncodeCompletion>,
    buffered: Vec<EncodedUnit>,
    closed: bool,
}

impl EncodePipeline {
    pub fn new(service: Box<dyn EncodeService>) -> Self {
        Self {
            service,
            pending: VecDeque::new(),
            buffered: Vec::new(),
            closed: false,
        }
    }

    /// Configure the codec and reset the unit buffer.
    pub fn configure(&mut self, config: &EncoderConfig) -> BlinkcapResult<()> {
        if config.width == 0 || config.height == 0 {
            return Err(BlinkcapError::configuration(format!(
                "Encoder dimensions must be positive, got {}x{}",
                config.width, config.height
            )));
        }
        self.pending.clear();
        self.buffered.clear();
        self.service.configure(config)
    }

    /// Submit one frame with its keyframe hint.
    ///
    /// A submission failure is reported to the caller (which logs and
    /// continues); already-buffered units are unaffected.
    pub fn submit(&mut self, frame: RawFrame, key_frame: bool) -> BlinkcapResult<()> {
        let completion = self.service.encode(frame, key_frame)?;
        self.pending.push_back(completion);
        self.drain_ready();
        Ok(())
    }

    /// Move completed units into the buffer, strictly from the front of
    /// the pending queue so submission order is preserved even when a
    /// later submission completed first.
    fn drain_ready(&mut self) {
        while let Some(front) = self.pending.front_mut() {
            match front.try_recv() {
                Ok(Ok(unit)) => {
                    self.pending.pop_front();
                    self.buffered.push(unit);
                }
                Ok(Err(e)) => {
                    self.pending.pop_front();
                    tracing::warn!(error = %e, "Encoder reported a per-frame error");
                }
                Err(oneshot::error::TryRecvError::Empty) => break,
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.pending.pop_front();
                    tracing::warn!("Encoder dropped a completion without a unit");
                }
            }
        }
    }

    /// Drain in-flight encodes and finalize the buffer.
    ///
    /// A codec flush error is returned as a non-fatal `FlushWarning`;
    /// everything that did complete stays buffered either way.
    pub async fn flush(&mut self) -> BlinkcapResult<()> {
        let flush_result = self.service.flush().await;

        for completion in self.pending.drain(..) {
            match completion.await {
                Ok(Ok(unit)) => self.buffered.push(unit),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Encoder reported a per-frame error during flush")
                }
                Err(_) => tracing::warn!("Encoder dropped a completion during flush"),
            }
        }

        flush_result
            .map_err(|e| BlinkcapError::flush_warning(format!("Codec flush failed: {e}")))
    }

    /// Number of units buffered so far.
    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// Hand the buffered units to the caller, leaving the buffer empty.
    pub fn take_units(&mut self) -> Vec<EncodedUnit> {
        std::mem::take(&mut self.buffered)
    }

    /// Release the codec. Safe to call multiple times.
    pub fn close(&mut self) {
        if !self.closed {
            self.service.close();
            self.closed = true;
        }
    }
}

/// Passthrough encoder: wraps raw RGBA pixels in a small dimensioned
/// header and resolves each submission immediately. Stands in for a
/// real codec in tests and hardware-free demos; pairs with the
/// raw-RGBA decoder in the render engine.
pub struct RawRgbaEncoder {
    configured: Option<EncoderConfig>,
    closed: bool,
}

/// Payload layout for passthrough units: magic, width, height, RGBA.
pub const RAW_RGBA_MAGIC: &[u8; 4] = b"BRG0";

impl RawRgbaEncoder {
    pub fn new() -> Self {
        Self {
            configured: None,
            closed: false,
        }
    }
}

impl Default for RawRgbaEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EncodeService for RawRgbaEncoder {
    fn configure(&mut self, config: &EncoderConfig) -> BlinkcapResult<()> {
        self.configured = Some(*config);
        Ok(())
    }

    fn encode(&mut self, frame: RawFrame, key_frame: bool) -> BlinkcapResult<EncodeCompletion> {
        if self.closed || self.configured.is_none() {
            return Err(BlinkcapError::configuration(
                "Encoder used before configure or after close",
            ));
        }

        let mut payload = Vec::with_capacity(12 + frame.data.len());
        payload.extend_from_slice(RAW_RGBA_MAGIC);
        payload.extend_from_slice(&frame.width.to_le_bytes());
        payload.extend_from_slice(&frame.height.to_le_bytes());
        payload.extend_from_slice(&frame.data);

        let unit = EncodedUnit {
            payload,
            timestamp_us: frame.timestamp_us,
            kind: if key_frame {
                UnitKind::Key
            } else {
                UnitKind::Delta
            },
        };

        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Ok(unit));
        Ok(rx)
    }

    async fn flush(&mut self) -> BlinkcapResult<()> {
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ts: u64) -> RawFrame {
        RawFrame {
            data: vec![0u8; 4 * 4 * 4],
            width: 4,
            height: 4,
            timestamp_us: ts,
        }
    }

    fn configured_pipeline(service: Box<dyn EncodeService>) -> EncodePipeline {
        let mut pipeline = EncodePipeline::new(service);
        pipeline
            .configure(&EncoderConfig {
                width: 4,
                height: 4,
                bitrate: 500_000,
                framerate: 2,
            })
            .unwrap();
        pipeline
    }

    #[test]
    fn configure_rejects_zero_dimensions() {
        let mut pipeline = EncodePipeline::new(Box::new(RawRgbaEncoder::new()));
        let err = pipeline
            .configure(&EncoderConfig {
                width: 0,
                height: 240,
                bitrate: 500_000,
                framerate: 2,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            BlinkcapError::Configuration { .. }
        ));
    }

    #[tokio::test]
    async fn passthrough_units_carry_kind_and_timestamp() {
        let mut pipeline = configured_pipeline(Box::new(RawRgbaEncoder::new()));
        pipeline.submit(frame(10), true).unwrap();
        pipeline.submit(frame(20), false).unwrap();
        pipeline.flush().await.unwrap();

        let units = pipeline.take_units();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].kind, UnitKind::Key);
        assert_eq!(units[1].kind, UnitKind::Delta);
        assert!(units[0].timestamp_us <= units[1].timestamp_us);
        assert_eq!(&units[0].payload[..4], RAW_RGBA_MAGIC);
    }

    /// Encoder whose completions are resolved manually, out of order.
    struct ManualEncoder {
        slots: std::sync::Arc<std::sync::Mutex<Vec<oneshot::Sender<BlinkcapResult<EncodedUnit>>>>>,
    }

    #[async_trait::async_trait]
    impl EncodeService for ManualEncoder {
        fn configure(&mut self, _config: &EncoderConfig) -> BlinkcapResult<()> {
            Ok(())
        }

        fn encode(
            &mut self,
            _frame: RawFrame,
            _key_frame: bool,
        ) -> BlinkcapResult<EncodeCompletion> {
            let (tx, rx) = oneshot::channel();
            self.slots.lock().unwrap().push(tx);
            Ok(rx)
        }

        async fn flush(&mut self) -> BlinkcapResult<()> {
            Ok(())
        }

        fn close(&mut self) {}
    }

    fn unit(tag: u8) -> EncodedUnit {
        EncodedUnit {
            payload: vec![tag],
            timestamp_us: tag as u64,
            kind: UnitKind::Delta,
        }
    }

    #[tokio::test]
    async fn out_of_order_completions_buffer_in_submission_order() {
        let slots = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut pipeline = configured_pipeline(Box::new(ManualEncoder {
            slots: slots.clone(),
        }));

        pipeline.submit(frame(0), true).unwrap();
        pipeline.submit(frame(1), false).unwrap();
        pipeline.submit(frame(2), false).unwrap();

        // Resolve in reverse submission order.
        let senders: Vec<_> = slots.lock().unwrap().drain(..).collect();
        for (tag, tx) in senders.into_iter().enumerate().rev() {
            let _ = tx.send(Ok(unit(tag as u8)));
        }

        pipeline.flush().await.unwrap();
        let units = pipeline.take_units();
        let tags: Vec<u8> = units.iter().map(|u| u.payload[0]).collect();
        assert_eq!(tags, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn failed_completion_is_skipped_without_losing_siblings() {
        let slots = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut pipeline = configured_pipeline(Box::new(ManualEncoder {
            slots: slots.clone(),
        }));

        pipeline.submit(frame(0), true).unwrap();
        pipeline.submit(frame(1), false).unwrap();

        let senders: Vec<_> = slots.lock().unwrap().drain(..).collect();
        let mut senders = senders.into_iter();
        let _ = senders
            .next()
            .unwrap()
            .send(Err(BlinkcapError::capture_tick("encode glitch")));
        let _ = senders.next().unwrap().send(Ok(unit(1)));

        pipeline.flush().await.unwrap();
        let units = pipeline.take_units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].payload[0], 1);
    }

    /// Encoder whose flush always fails.
    struct SulkyFlushEncoder;

    #[async_trait::async_trait]
    impl EncodeService for SulkyFlushEncoder {
        fn configure(&mut self, _config: &EncoderConfig) -> BlinkcapResult<()> {
            Ok(())
        }

        fn encode(&mut self, frame: RawFrame, key: bool) -> BlinkcapResult<EncodeCompletion> {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(Ok(EncodedUnit {
                payload: frame.data,
                timestamp_us: frame.timestamp_us,
                kind: if key { UnitKind::Key } else { UnitKind::Delta },
            }));
            Ok(rx)
        }

        async fn flush(&mut self) -> BlinkcapResult<()> {
            Err(BlinkcapError::platform("codec flush failed"))
        }

        fn close(&mut self) {}
    }

    #[tokio::test]
    async fn flush_error_is_soft_and_keeps_buffered_units() {
        let mut pipeline = configured_pipeline(Box::new(SulkyFlushEncoder));
        pipeline.submit(frame(5), true).unwrap();

        let err = pipeline.flush().await.unwrap_err();
        assert!(matches!(err, BlinkcapError::FlushWarning { .. }));
        assert_eq!(pipeline.take_units().len(), 1);
    }

    #[test]
    fn close_is_idempotent() {
        let mut pipeline = configured_pipeline(Box::new(RawRgbaEncoder::new()));
        pipeline.close();
        pipeline.close();
    }
}
