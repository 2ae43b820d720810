//! Capture session management: the timed pattern loop.
//!
//! A session owns one scheduler run: it flips the visual signal once
//! per step, waits a settle delay so the signal propagates into the
//! camera path, pulls exactly one frame, and forwards it to the encode
//! pipeline with its keyframe hint. Per-tick failures are contained;
//! only acquisition and configuration failures reject `start`.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use blinkcap_common::clock::CaptureClock;
use blinkcap_common::config::CaptureDefaults;
use blinkcap_common::error::{BlinkcapError, BlinkcapResult};
use blinkcap_common::pattern::PatternClock;

use crate::encode::{EncodePipeline, EncodeService, EncodedUnit, EncoderConfig};
use crate::sink::SignalSink;
use crate::source::{FrameSource, SourceDimensions};

/// Configuration for starting a new capture session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Signaling pattern (`0`/`1` string), one symbol per tick.
    pub pattern: String,

    /// Total session duration; the step interval is `total / len`.
    pub total_duration: Duration,

    /// Delay between flipping the signal and pulling the frame.
    pub settle: Duration,

    /// Fixed encoder policy values.
    pub bitrate: u32,
    pub framerate: u32,

    /// Resolution used when the source still reports zero dimensions
    /// after the grace retry.
    pub fallback_dimensions: SourceDimensions,

    /// Grace delay before the single dimension re-probe.
    pub source_retry_delay: Duration,
}

impl SessionConfig {
    pub fn from_defaults(defaults: &CaptureDefaults) -> Self {
        Self {
            pattern: defaults.pattern.clone(),
            total_duration: Duration::from_millis(defaults.total_duration_ms),
            settle: Duration::from_millis(defaults.settle_ms),
            bitrate: defaults.bitrate,
            framerate: defaults.framerate,
            fallback_dimensions: SourceDimensions::new(
                defaults.fallback_width,
                defaults.fallback_height,
            ),
            source_retry_delay: Duration::from_millis(defaults.source_retry_delay_ms),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_defaults(&CaptureDefaults::default())
    }
}

/// State of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session running.
    Idle,
    /// The timed loop is firing.
    Capturing,
    /// All ticks fired; flushing the encoder and tearing down.
    Finishing,
}

const STATE_IDLE: u8 = 0;
const STATE_CAPTURING: u8 = 1;
const STATE_FINISHING: u8 = 2;

/// Invoked with the buffered units when the session completes
/// naturally. Not invoked on `force_stop`.
pub type CompletionCallback = Box<dyn FnOnce(Vec<EncodedUnit>) + Send + 'static>;

struct SessionShared {
    state: AtomicU8,
    stop: AtomicBool,
    tick: AtomicUsize,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_CAPTURING),
            stop: AtomicBool::new(false),
            tick: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> SessionState {
        match self.state.load(Ordering::SeqCst) {
            STATE_CAPTURING => SessionState::Capturing,
            STATE_FINISHING => SessionState::Finishing,
            _ => SessionState::Idle,
        }
    }

    fn set_state(&self, state: SessionState) {
        let raw = match state {
            SessionState::Idle => STATE_IDLE,
            SessionState::Capturing => STATE_CAPTURING,
            SessionState::Finishing => STATE_FINISHING,
        };
        self.state.store(raw, Ordering::SeqCst);
    }
}

/// Everything the scheduler loop owns while a session is live. Taken
/// out of the shared slot exactly once, by whichever of the loop or
/// `force_stop` gets there first, which is what makes teardown
/// idempotent.
struct SessionRuntime {
    source: Box<dyn FrameSource>,
    sink: Box<dyn SignalSink>,
    pipeline: EncodePipeline,
    clock: CaptureClock,
}

type SharedRuntime = Arc<tokio::sync::Mutex<Option<SessionRuntime>>>;

struct ActiveSession {
    shared: Arc<SessionShared>,
    runtime: SharedRuntime,
}

/// A capture session that coordinates the pattern clock, frame source,
/// display sink, and encode pipeline through one timed loop.
pub struct CaptureSession {
    config: SessionConfig,
    active: Option<ActiveSession>,
}

impl CaptureSession {
    /// Create a new capture session with the given configuration.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            active: None,
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.active
            .as_ref()
            .map(|a| a.shared.state())
            .unwrap_or(SessionState::Idle)
    }

    /// Ticks completed so far in the current session.
    pub fn completed_ticks(&self) -> usize {
        self.active
            .as_ref()
            .map(|a| a.shared.tick.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Start capturing.
    ///
    /// Acquires the frame source, configures the encoder, resets the
    /// tick index and unit buffer, and spawns the periodic loop. On
    /// natural completion `on_complete` receives the buffered units.
    ///
    /// A failed start releases everything it acquired and leaves the
    /// session idle.
    pub async fn start(
        &mut self,
        mut source: Box<dyn FrameSource>,
        mut sink: Box<dyn SignalSink>,
        encoder: Box<dyn EncodeService>,
        on_complete: CompletionCallback,
    ) -> BlinkcapResult<()> {
        if self.state() != SessionState::Idle {
            return Err(BlinkcapError::session(
                "A capture session is already active",
            ));
        }

        let pattern = PatternClock::new(&self.config.pattern, self.config.total_duration)?;

        tracing::info!(
            steps = pattern.len(),
            step_ms = pattern.step_interval().as_millis() as u64,
            "Starting capture session"
        );

        if let Err(e) = source.acquire().await {
            source.release().await;
            return Err(BlinkcapError::source_unavailable(format!(
                "Failed to acquire frame source: {e}"
            )));
        }

        let dimensions = self.negotiate_dimensions(source.as_mut()).await;

        let mut pipeline = EncodePipeline::new(encoder);
        let encoder_config = EncoderConfig {
            width: dimensions.width,
            height: dimensions.height,
            bitrate: self.config.bitrate,
            framerate: self.config.framerate,
        };
        if let Err(e) = pipeline.configure(&encoder_config) {
            pipeline.close();
            source.release().await;
            sink.reset();
            return Err(e);
        }

        let clock = CaptureClock::start();
        tracing::info!(
            epoch_wall = %clock.epoch_wall(),
            width = dimensions.width,
            height = dimensions.height,
            "Capture clock started"
        );

        let shared = Arc::new(SessionShared::new());
        let runtime: SharedRuntime = Arc::new(tokio::sync::Mutex::new(Some(SessionRuntime {
            source,
            sink,
            pipeline,
            clock,
        })));

        tokio::spawn(run_loop(
            shared.clone(),
            runtime.clone(),
            pattern,
            self.config.settle,
            on_complete,
        ));

        self.active = Some(ActiveSession { shared, runtime });
        Ok(())
    }

    /// Resolve the capture resolution, applying the bounded grace-wait
    /// policy: one re-probe after a fixed delay, then fall back to the
    /// configured default resolution rather than failing.
    async fn negotiate_dimensions(&self, source: &mut dyn FrameSource) -> SourceDimensions {
        let mut dimensions = source.dimensions().await;
        if dimensions.is_zero() {
            tokio::time::sleep(self.config.source_retry_delay).await;
            dimensions = source.dimensions().await;
        }
        if dimensions.is_zero() {
            tracing::warn!(
                width = self.config.fallback_dimensions.width,
                height = self.config.fallback_dimensions.height,
                "Source never reported dimensions; using fallback resolution"
            );
            return self.config.fallback_dimensions;
        }
        dimensions
    }

    /// Stop the session immediately, regardless of progress.
    ///
    /// Cancels further firings, tears down resources, and forces the
    /// state to idle. Safe to call at any time, including when already
    /// idle, and safe to call repeatedly. Waits only for an in-flight
    /// signal set or frame pull to release the runtime; a tick sitting
    /// in its settle delay is abandoned without its frame.
    pub async fn force_stop(&mut self) {
        let Some(active) = self.active.as_ref() else {
            return;
        };

        active.shared.stop.store(true, Ordering::SeqCst);

        // Claims the runtime as soon as no tick phase holds the lock
        // (the settle wait does not); the loop exits on its next check.
        let taken = active.runtime.lock().await.take();
        if let Some(mut runtime) = taken {
            tracing::info!(
                ticks = active.shared.tick.load(Ordering::SeqCst),
                "Force-stopping capture session"
            );
            teardown(&mut runtime).await;
        }
        active.shared.set_state(SessionState::Idle);
    }
}

/// The periodic scheduler loop. Runs as a spawned task; exits when all
/// ticks fired or when `force_stop` claims the runtime.
async fn run_loop(
    shared: Arc<SessionShared>,
    runtime: SharedRuntime,
    pattern: PatternClock,
    settle: Duration,
    on_complete: CompletionCallback,
) {
    let total = pattern.len();
    let step = pattern.step_interval();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + step, step);

    loop {
        ticker.tick().await;

        let tick = shared.tick.load(Ordering::SeqCst);
        let symbol = pattern.symbol_at(tick);

        {
            let mut guard = runtime.lock().await;
            // Guards the race with a firing scheduled just before
            // cancellation: once the runtime is claimed or the stop
            // flag is set, this firing is a no-op.
            let Some(rt) = guard.as_mut() else { return };
            if shared.stop.load(Ordering::SeqCst) || shared.state() != SessionState::Capturing {
                return;
            }
            if let Err(e) = rt.sink.set_signal(symbol) {
                tracing::warn!(tick, error = %e, "Display sink rejected signal");
            }
        }

        // The settle wait holds no lock, so a concurrent force_stop
        // claims the runtime here instead of waiting out the step; this
        // tick then exits below without pulling its frame.
        tokio::time::sleep(settle).await;

        let mut guard = runtime.lock().await;
        let Some(rt) = guard.as_mut() else { return };
        if shared.stop.load(Ordering::SeqCst) {
            return;
        }

        let timestamp_us = rt.clock.elapsed_us();
        match rt.source.pull_frame(timestamp_us).await {
            Ok(frame) => {
                let key_frame = pattern.is_keyframe(tick);
                if let Err(e) = rt.pipeline.submit(frame, key_frame) {
                    tracing::warn!(tick, error = %e, "Frame submission failed; continuing");
                }
            }
            Err(e) => {
                tracing::warn!(tick, error = %e, "Frame capture failed; continuing");
            }
        }
        drop(guard);

        let completed = shared.tick.fetch_add(1, Ordering::SeqCst) + 1;
        if completed >= total {
            break;
        }
    }

    // Natural completion: flush, deliver, tear down.
    shared.set_state(SessionState::Finishing);

    let taken = runtime.lock().await.take();
    let Some(mut rt) = taken else {
        // force_stop got here first.
        shared.set_state(SessionState::Idle);
        return;
    };

    if let Err(e) = rt.pipeline.flush().await {
        tracing::warn!(error = %e, "Encoder flush reported an error");
    }
    let units = rt.pipeline.take_units();
    teardown(&mut rt).await;
    shared.set_state(SessionState::Idle);

    tracing::info!(units = units.len(), "Capture session complete");
    on_complete(units);
}

/// Centralized session teardown: close the codec, release the camera,
/// reset the display to neutral. Callers claim the runtime through
/// `Option::take`, so this runs at most once per session.
async fn teardown(runtime: &mut SessionRuntime) {
    runtime.pipeline.close();
    runtime.source.release().await;
    runtime.sink.reset();
}
