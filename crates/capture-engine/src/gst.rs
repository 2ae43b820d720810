//! GStreamer-backed camera source and VP8 encoder (feature `gst`).
//!
//! The camera source wraps `v4l2src ! videoconvert ! appsink` and pulls
//! one RGBA sample per tick. The encoder wraps
//! `appsrc ! videoconvert ! vp8enc ! appsink`; VP8 is one-in-one-out
//! (no frame reordering), so appsink samples pair with pending encode
//! completions in submission order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};

use blinkcap_common::error::{BlinkcapError, BlinkcapResult};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tokio::sync::oneshot;

use crate::encode::{EncodeCompletion, EncodeService, EncodedUnit, EncoderConfig, UnitKind};
use crate::source::{FrameSource, RawFrame, SourceDimensions};

const SAMPLE_TIMEOUT: gst::ClockTime = gst::ClockTime::from_seconds(1);
const PROBE_TIMEOUT: gst::ClockTime = gst::ClockTime::from_mseconds(200);

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

/// Live camera source pulling RGBA frames from a V4L2 device.
pub struct GstCameraSource {
    device: Option<String>,
    pipeline: Option<gst::Pipeline>,
    appsink: Option<gst_app::AppSink>,
    dimensions: SourceDimensions,
}

impl GstCameraSource {
    /// Use an explicit device node, or auto-detect when `None`.
    pub fn new(device: Option<String>) -> Self {
        Self {
            device,
            pipeline: None,
            appsink: None,
            dimensions: SourceDimensions::new(0, 0),
        }
    }

    fn note_dimensions(&mut self, sample: &gst::Sample) {
        if let Some(caps) = sample.caps() {
            if let Ok(info) = gst_video::VideoInfo::from_caps(caps) {
                self.dimensions = SourceDimensions::new(info.width(), info.height());
            }
        }
    }
}

#[async_trait::async_trait]
impl FrameSource for GstCameraSource {
    async fn acquire(&mut self) -> BlinkcapResult<()> {
        init_gstreamer()?;

        let device = match self.device.clone() {
            Some(device) => device,
            None => detect_preferred_camera_device().ok_or_else(|| {
                BlinkcapError::source_unavailable(
                    "No camera device found (expected /dev/video0 or another /dev/video* node)",
                )
            })?,
        };

        let launch = format!(
            "v4l2src device=\"{}\" do-timestamp=true ! videoconvert ! video/x-raw,format=RGBA ! \
             appsink name=sink sync=false max-buffers=1 drop=true",
            device.replace('"', "\\\"")
        );
        let pipeline = gst::parse::launch(&launch)
            .map_err(|e| {
                BlinkcapError::source_unavailable(format!("Failed to build camera pipeline: {e}"))
            })?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| {
                BlinkcapError::source_unavailable("Launch string did not produce a pipeline")
            })?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| BlinkcapError::source_unavailable("appsink missing from pipeline"))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| BlinkcapError::source_unavailable("appsink has unexpected type"))?;

        pipeline.set_state(gst::State::Playing).map_err(|e| {
            BlinkcapError::source_unavailable(format!("Failed to start camera pipeline: {e:?}"))
        })?;

        tracing::info!(device = %device, "Camera pipeline started");
        self.pipeline = Some(pipeline);
        self.appsink = Some(appsink);
        Ok(())
    }

    async fn dimensions(&mut self) -> SourceDimensions {
        if !self.dimensions.is_zero() {
            return self.dimensions;
        }
        // Re-probe: pull a warm-up sample just to learn the caps.
        if let Some(appsink) = self.appsink.as_ref() {
            if let Some(sample) = appsink.try_pull_sample(PROBE_TIMEOUT) {
                self.note_dimensions(&sample);
            }
        }
        self.dimensions
    }

    async fn pull_frame(&mut self, timestamp_us: u64) -> BlinkcapResult<RawFrame> {
        let appsink = self
            .appsink
            .as_ref()
            .ok_or_else(|| BlinkcapError::capture_tick("Camera source not acquired"))?;

        let sample = appsink
            .try_pull_sample(SAMPLE_TIMEOUT)
            .ok_or_else(|| BlinkcapError::capture_tick("Camera produced no sample in time"))?;
        self.note_dimensions(&sample);

        let buffer = sample
            .buffer()
            .ok_or_else(|| BlinkcapError::capture_tick("Camera sample had no buffer"))?;
        let map = buffer
            .map_readable()
            .map_err(|_| BlinkcapError::capture_tick("Failed to map camera buffer"))?;

        Ok(RawFrame {
            data: map.as_slice().to_vec(),
            width: self.dimensions.width,
            height: self.dimensions.height,
            timestamp_us,
        })
    }

    async fn release(&mut self) {
        self.appsink = None;
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                tracing::warn!(error = ?e, "Failed to stop camera pipeline");
            }
        }
        self.dimensions = SourceDimensions::new(0, 0);
    }
}

/// VP8 encoder behind an appsrc/appsink pair.
pub struct GstVp8Encoder {
    pipeline: Option<gst::Pipeline>,
    appsrc: Option<gst_app::AppSrc>,
    appsink: Option<gst_app::AppSink>,
    pending: Arc<Mutex<VecDeque<oneshot::Sender<BlinkcapResult<EncodedUnit>>>>>,
}

impl GstVp8Encoder {
    pub fn new() -> Self {
        Self {
            pipeline: None,
            appsrc: None,
            appsink: None,
            pending: Arc::new(Mutex::new(VecDeque::new())),
        }
    }
}

impl Default for GstVp8Encoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EncodeService for GstVp8Encoder {
    fn configure(&mut self, config: &EncoderConfig) -> BlinkcapResult<()> {
        init_gstreamer()?;

        // deadline=1 selects realtime encoding; each pushed frame comes
        // straight back out, which keeps completion order deterministic.
        let launch = format!(
            "appsrc name=src is-live=true format=time ! videoconvert ! \
             vp8enc deadline=1 target-bitrate={} ! appsink name=sink sync=false",
            config.bitrate
        );
        let pipeline = gst::parse::launch(&launch)
            .map_err(|e| {
                BlinkcapError::configuration(format!("Failed to build encoder pipeline: {e}"))
            })?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| BlinkcapError::configuration("Launch string did not produce a pipeline"))?;

        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| BlinkcapError::configuration("appsrc missing from pipeline"))?
            .downcast::<gst_app::AppSrc>()
            .map_err(|_| BlinkcapError::configuration("appsrc has unexpected type"))?;
        let caps = gst::Caps::builder("video/x-raw")
            .field("format", "RGBA")
            .field("width", config.width as i32)
            .field("height", config.height as i32)
            .field("framerate", gst::Fraction::new(config.framerate as i32, 1))
            .build();
        appsrc.set_caps(Some(&caps));

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| BlinkcapError::configuration("appsink missing from pipeline"))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| BlinkcapError::configuration("appsink has unexpected type"))?;

        let pending = self.pending.clone();
        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let Some(sender) = pending.lock().unwrap().pop_front() else {
                        // An output with no matching submission; drop it.
                        return Ok(gst::FlowSuccess::Ok);
                    };
                    let _ = sender.send(sample_to_unit(&sample));
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline.set_state(gst::State::Playing).map_err(|e| {
            BlinkcapError::configuration(format!("Failed to start encoder pipeline: {e:?}"))
        })?;

        self.pending.lock().unwrap().clear();
        self.pipeline = Some(pipeline);
        self.appsrc = Some(appsrc);
        self.appsink = Some(appsink);
        Ok(())
    }

    fn encode(&mut self, frame: RawFrame, key_frame: bool) -> BlinkcapResult<EncodeCompletion> {
        let appsrc = self
            .appsrc
            .as_ref()
            .ok_or_else(|| BlinkcapError::configuration("Encoder not configured"))?;

        if key_frame {
            if let Some(appsink) = self.appsink.as_ref() {
                let event = gst_video::UpstreamForceKeyUnitEvent::builder()
                    .all_headers(true)
                    .build();
                if !appsink.send_event(event) {
                    tracing::warn!("Force-key-unit event was not handled");
                }
            }
        }

        let timestamp_us = frame.timestamp_us;
        let mut buffer = gst::Buffer::from_mut_slice(frame.data);
        {
            let buffer = buffer.get_mut().expect("fresh buffer is writable");
            buffer.set_pts(gst::ClockTime::from_useconds(timestamp_us));
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().push_back(tx);

        if let Err(e) = appsrc.push_buffer(buffer) {
            // Unregister the completion we just queued.
            self.pending.lock().unwrap().pop_back();
            return Err(BlinkcapError::capture_tick(format!(
                "Encoder rejected frame: {e:?}"
            )));
        }
        Ok(rx)
    }

    async fn flush(&mut self) -> BlinkcapResult<()> {
        let Some(appsrc) = self.appsrc.as_ref() else {
            return Ok(());
        };
        appsrc
            .end_of_stream()
            .map_err(|e| BlinkcapError::platform(format!("Failed to signal EOS: {e:?}")))?;

        // Wait for EOS to propagate so the encoder drains its queue;
        // bounded so a stuck pipeline cannot hang teardown.
        let Some(pipeline) = self.pipeline.as_ref() else {
            return Ok(());
        };
        let Some(bus) = pipeline.bus() else {
            return Ok(());
        };
        match bus.timed_pop_filtered(
            gst::ClockTime::from_seconds(5),
            &[gst::MessageType::Eos, gst::MessageType::Error],
        ) {
            Some(msg) => match msg.view() {
                gst::MessageView::Eos(_) => Ok(()),
                gst::MessageView::Error(e) => Err(BlinkcapError::platform(format!(
                    "Encoder error during flush: {}",
                    e.error()
                ))),
                _ => Ok(()),
            },
            None => Err(BlinkcapError::platform("Encoder flush timed out")),
        }
    }

    fn close(&mut self) {
        self.appsrc = None;
        self.appsink = None;
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                tracing::warn!(error = ?e, "Failed to stop encoder pipeline");
            }
        }
        self.pending.lock().unwrap().clear();
    }
}

fn sample_to_unit(sample: &gst::Sample) -> BlinkcapResult<EncodedUnit> {
    let buffer = sample
        .buffer()
        .ok_or_else(|| BlinkcapError::capture_tick("Encoder sample had no buffer"))?;
    let map = buffer
        .map_readable()
        .map_err(|_| BlinkcapError::capture_tick("Failed to map encoded buffer"))?;

    let kind = if buffer.flags().contains(gst::BufferFlags::DELTA_UNIT) {
        UnitKind::Delta
    } else {
        UnitKind::Key
    };

    Ok(EncodedUnit {
        payload: map.as_slice().to_vec(),
        timestamp_us: buffer.pts().map(|pts| pts.useconds()).unwrap_or(0),
        kind,
    })
}

/// Pick the V4L2 node that most looks like a user-facing camera.
///
/// Scans `/dev/video0`–`/dev/video15` and scores each candidate from
/// its sysfs device name: front/user-facing names win, generic webcam
/// names rank next, tuner/HDMI-capture names are excluded. Falls back
/// to the lowest-numbered node when no name gives a signal.
pub fn detect_preferred_camera_device() -> Option<String> {
    let mut candidates: Vec<(String, u32)> = Vec::new();

    for idx in 0..16u32 {
        let dev_path = format!("/dev/video{idx}");
        if !std::path::Path::new(&dev_path).exists() {
            continue;
        }
        let priority = camera_device_priority(idx);
        if priority > 0 || candidates.is_empty() {
            candidates.push((dev_path, priority));
        }
    }

    candidates.sort_by(|a, b| b.1.cmp(&a.1));
    let best = candidates.into_iter().next()?;
    tracing::info!(device = %best.0, priority = best.1, "Selected camera device");
    Some(best.0)
}

/// Score a V4L2 device as a user-facing camera candidate.
fn camera_device_priority(idx: u32) -> u32 {
    let name_path = format!("/sys/class/video4linux/video{idx}/name");
    let device_name = std::fs::read_to_string(&name_path)
        .unwrap_or_default()
        .to_lowercase();

    let excluded = ["tuner", "tv", "dvb", "hdmi", "encoder", "decoder"];
    if excluded.iter().any(|kw| device_name.contains(kw)) {
        return 0;
    }

    // The session displays its signal on the screen the user faces, so
    // front/user-facing cameras are preferred over anything else.
    let front_facing = ["front", "user", "integrated", "facetime"];
    if front_facing.iter().any(|kw| device_name.contains(kw)) {
        return 100;
    }

    let generic = ["webcam", "camera", "cam", "uvc"];
    if generic.iter().any(|kw| device_name.contains(kw)) {
        return 50;
    }

    10
}
