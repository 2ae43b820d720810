//! GStreamer-backed one-shot VP8 decoder (feature `gst`).
//!
//! Each decoder instance owns a short-lived
//! `appsrc ! vp8dec ! videoconvert ! appsink` pipeline: one unit goes
//! in, one RGBA frame comes out, then the pipeline is torn down. Delta
//! units pushed without their predecessors will simply fail to produce
//! a sample, which the caller treats as undecodable.

use std::sync::OnceLock;

use blinkcap_capture_engine::encode::{EncodedUnit, UnitKind};
use blinkcap_common::error::{BlinkcapError, BlinkcapResult};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use crate::decode::{DecodeService, DecodedImage, DecoderFactory};

const DECODE_TIMEOUT: gst::ClockTime = gst::ClockTime::from_seconds(2);

fn init_gstreamer() -> BlinkcapResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(BlinkcapError::platform(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

/// One-shot VP8 decoder.
pub struct GstVp8Decoder {
    pipeline: Option<gst::Pipeline>,
}

impl GstVp8Decoder {
    pub fn new() -> BlinkcapResult<Self> {
        init_gstreamer()?;
        Ok(Self { pipeline: None })
    }
}

#[async_trait::async_trait]
impl DecodeService for GstVp8Decoder {
    async fn decode(&mut self, unit: &EncodedUnit) -> BlinkcapResult<DecodedImage> {
        let launch = "appsrc name=src format=time caps=video/x-vp8 ! vp8dec ! videoconvert ! \
                      video/x-raw,format=RGBA ! appsink name=sink sync=false";
        let pipeline = gst::parse::launch(launch)
            .map_err(|e| BlinkcapError::decode(format!("Failed to build decoder pipeline: {e}")))?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| BlinkcapError::decode("Launch string did not produce a pipeline"))?;

        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| BlinkcapError::decode("appsrc missing from pipeline"))?
            .downcast::<gst_app::AppSrc>()
            .map_err(|_| BlinkcapError::decode("appsrc has unexpected type"))?;
        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| BlinkcapError::decode("appsink missing from pipeline"))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| BlinkcapError::decode("appsink has unexpected type"))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| BlinkcapError::decode(format!("Failed to start decoder: {e:?}")))?;
        self.pipeline = Some(pipeline);

        let mut buffer = gst::Buffer::from_slice(unit.payload.clone());
        {
            let buffer = buffer.get_mut().expect("fresh buffer is writable");
            buffer.set_pts(gst::ClockTime::from_useconds(unit.timestamp_us));
            if unit.kind == UnitKind::Delta {
                buffer.set_flags(gst::BufferFlags::DELTA_UNIT);
            }
        }

        appsrc
            .push_buffer(buffer)
            .map_err(|e| BlinkcapError::decode(format!("Decoder rejected unit: {e:?}")))?;
        appsrc
            .end_of_stream()
            .map_err(|e| BlinkcapError::decode(format!("Failed to signal EOS: {e:?}")))?;

        let sample = appsink
            .try_pull_sample(DECODE_TIMEOUT)
            .ok_or_else(|| BlinkcapError::decode("Unit produced no decodable frame"))?;

        let caps = sample
            .caps()
            .ok_or_else(|| BlinkcapError::decode("Decoded sample had no caps"))?;
        let info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|e| BlinkcapError::decode(format!("Unreadable decode caps: {e}")))?;

        let buffer = sample
            .buffer()
            .ok_or_else(|| BlinkcapError::decode("Decoded sample had no buffer"))?;
        let map = buffer
            .map_readable()
            .map_err(|_| BlinkcapError::decode("Failed to map decoded buffer"))?;

        Ok(DecodedImage {
            width: info.width(),
            height: info.height(),
            rgba: map.as_slice().to_vec(),
        })
    }

    fn close(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                tracing::warn!(error = ?e, "Failed to stop decoder pipeline");
            }
        }
    }
}

impl Drop for GstVp8Decoder {
    fn drop(&mut self) {
        self.close();
    }
}

/// Factory for one-shot VP8 decoders.
pub struct GstVp8DecoderFactory;

impl DecoderFactory for GstVp8DecoderFactory {
    fn create(&self) -> BlinkcapResult<Box<dyn DecodeService>> {
        Ok(Box::new(GstVp8Decoder::new()?))
    }
}
