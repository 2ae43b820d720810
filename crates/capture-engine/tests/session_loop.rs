//! Capture session scheduler tests.
//!
//! These run under paused tokio time, so the 10-second default session
//! completes instantly while still exercising the real tick cadence.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use blinkcap_capture_engine::{
    CaptureSession, EncodeCompletion, EncodeService, EncodedUnit, EncoderConfig, FrameSource,
    RawFrame, RawRgbaEncoder, SessionConfig, SessionState, SignalSink, SourceDimensions, UnitKind,
};
use blinkcap_common::error::{BlinkcapError, BlinkcapResult};
use blinkcap_common::pattern::Symbol;

#[derive(Default)]
struct SinkLog {
    symbols: Mutex<Vec<Symbol>>,
    resets: AtomicU32,
}

struct RecordingSink {
    log: Arc<SinkLog>,
}

impl SignalSink for RecordingSink {
    fn set_signal(&mut self, symbol: Symbol) -> BlinkcapResult<()> {
        self.log.symbols.lock().unwrap().push(symbol);
        Ok(())
    }

    fn reset(&mut self) {
        self.log.resets.fetch_add(1, Ordering::SeqCst);
    }
}

struct TestSource {
    width: u32,
    height: u32,
    /// Tick indices whose pull should fail.
    failing_pulls: Vec<u64>,
    pulls: u64,
    probes: Arc<AtomicU32>,
    zero_dimensions: bool,
    fail_acquire: bool,
    released: Arc<AtomicBool>,
}

impl TestSource {
    fn new(released: Arc<AtomicBool>) -> Self {
        Self {
            width: 1280,
            height: 720,
            failing_pulls: Vec::new(),
            pulls: 0,
            probes: Arc::new(AtomicU32::new(0)),
            zero_dimensions: false,
            fail_acquire: false,
            released,
        }
    }
}

#[async_trait::async_trait]
impl FrameSource for TestSource {
    async fn acquire(&mut self) -> BlinkcapResult<()> {
        if self.fail_acquire {
            return Err(BlinkcapError::platform("camera is on fire"));
        }
        Ok(())
    }

    async fn dimensions(&mut self) -> SourceDimensions {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.zero_dimensions {
            SourceDimensions::new(0, 0)
        } else {
            SourceDimensions::new(self.width, self.height)
        }
    }

    async fn pull_frame(&mut self, timestamp_us: u64) -> BlinkcapResult<RawFrame> {
        let index = self.pulls;
        self.pulls += 1;
        if self.failing_pulls.contains(&index) {
            return Err(BlinkcapError::capture_tick("sensor glitch"));
        }
        Ok(RawFrame {
            data: vec![0u8; 16],
            width: self.width,
            height: self.height,
            timestamp_us,
        })
    }

    async fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Encoder that records the configuration it was given and delegates
/// to the passthrough encoder.
struct ConfigSpyEncoder {
    inner: RawRgbaEncoder,
    seen: Arc<Mutex<Option<EncoderConfig>>>,
}

#[async_trait::async_trait]
impl EncodeService for ConfigSpyEncoder {
    fn configure(&mut self, config: &EncoderConfig) -> BlinkcapResult<()> {
        *self.seen.lock().unwrap() = Some(*config);
        self.inner.configure(config)
    }

    fn encode(&mut self, frame: RawFrame, key_frame: bool) -> BlinkcapResult<EncodeCompletion> {
        self.inner.encode(frame, key_frame)
    }

    async fn flush(&mut self) -> BlinkcapResult<()> {
        self.inner.flush().await
    }

    fn close(&mut self) {
        self.inner.close()
    }
}

fn short_config() -> SessionConfig {
    SessionConfig::default()
}

fn completion_channel() -> (
    Box<dyn FnOnce(Vec<EncodedUnit>) + Send>,
    tokio::sync::oneshot::Receiver<Vec<EncodedUnit>>,
) {
    let (tx, rx) = tokio::sync::oneshot::channel();
    (
        Box::new(move |units| {
            let _ = tx.send(units);
        }),
        rx,
    )
}

#[tokio::test(start_paused = true)]
async fn natural_completion_yields_one_unit_per_tick_in_order() {
    let released = Arc::new(AtomicBool::new(false));
    let sink_log = Arc::new(SinkLog::default());
    let (on_complete, rx) = completion_channel();

    let mut session = CaptureSession::new(short_config());
    session
        .start(
            Box::new(TestSource::new(released.clone())),
            Box::new(RecordingSink {
                log: sink_log.clone(),
            }),
            Box::new(RawRgbaEncoder::new()),
            on_complete,
        )
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Capturing);

    let units = rx.await.unwrap();
    assert_eq!(units.len(), 20);
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.completed_ticks(), 20);
    assert!(released.load(Ordering::SeqCst));
    assert!(sink_log.resets.load(Ordering::SeqCst) >= 1);

    // Timestamps are non-decreasing capture-time microseconds.
    for pair in units.windows(2) {
        assert!(pair[0].timestamp_us <= pair[1].timestamp_us);
    }

    // Keyframes fall exactly on signal transitions (pattern 0011..).
    let chars: Vec<char> = "00110011001100110011".chars().collect();
    let expected: Vec<UnitKind> = (0..20)
        .map(|i| {
            if i == 0 || chars[i] != chars[i - 1] {
                UnitKind::Key
            } else {
                UnitKind::Delta
            }
        })
        .collect();
    let kinds: Vec<UnitKind> = units.iter().map(|u| u.kind).collect();
    assert_eq!(kinds, expected);
    assert_eq!(kinds[0], UnitKind::Key);

    // The sink saw every symbol exactly once, in pattern order.
    let symbols = sink_log.symbols.lock().unwrap();
    assert_eq!(symbols.len(), 20);
    let pattern: Vec<Symbol> = "00110011001100110011"
        .chars()
        .map(|c| if c == '1' { Symbol::High } else { Symbol::Low })
        .collect();
    assert_eq!(*symbols, pattern);
}

#[tokio::test(start_paused = true)]
async fn failed_ticks_are_swallowed_and_shrink_the_output() {
    let released = Arc::new(AtomicBool::new(false));
    let mut source = TestSource::new(released.clone());
    source.failing_pulls = vec![3, 7];
    let (on_complete, rx) = completion_channel();

    let mut session = CaptureSession::new(short_config());
    session
        .start(
            Box::new(source),
            Box::new(RecordingSink {
                log: Arc::new(SinkLog::default()),
            }),
            Box::new(RawRgbaEncoder::new()),
            on_complete,
        )
        .await
        .unwrap();

    let units = rx.await.unwrap();
    assert_eq!(units.len(), 18);
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.completed_ticks(), 20);
}

#[tokio::test(start_paused = true)]
async fn force_stop_midway_releases_everything_and_is_idempotent() {
    let released = Arc::new(AtomicBool::new(false));
    let sink_log = Arc::new(SinkLog::default());
    let completed = Arc::new(AtomicBool::new(false));
    let completed_flag = completed.clone();

    let mut session = CaptureSession::new(short_config());
    session
        .start(
            Box::new(TestSource::new(released.clone())),
            Box::new(RecordingSink {
                log: sink_log.clone(),
            }),
            Box::new(RawRgbaEncoder::new()),
            Box::new(move |_| completed_flag.store(true, Ordering::SeqCst)),
        )
        .await
        .unwrap();

    // Let a few ticks fire (step is 500 ms), then cut the session short.
    tokio::time::sleep(Duration::from_millis(1750)).await;
    let ticks = session.completed_ticks();
    assert!(ticks >= 1 && ticks < 20);

    session.force_stop().await;
    assert_eq!(session.state(), SessionState::Idle);
    assert!(released.load(Ordering::SeqCst));
    assert!(sink_log.resets.load(Ordering::SeqCst) >= 1);

    // Second call is a safe no-op.
    session.force_stop().await;
    assert_eq!(session.state(), SessionState::Idle);

    // Give any stray firing a chance to run; none may fire after stop.
    let symbols_at_stop = sink_log.symbols.lock().unwrap().len();
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(sink_log.symbols.lock().unwrap().len(), symbols_at_stop);
    assert!(!completed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn force_stop_during_the_settle_wait_abandons_the_tick() {
    let released = Arc::new(AtomicBool::new(false));
    let sink_log = Arc::new(SinkLog::default());
    let completed = Arc::new(AtomicBool::new(false));
    let completed_flag = completed.clone();

    let mut session = CaptureSession::new(short_config());
    session
        .start(
            Box::new(TestSource::new(released.clone())),
            Box::new(RecordingSink {
                log: sink_log.clone(),
            }),
            Box::new(RawRgbaEncoder::new()),
            Box::new(move |_| completed_flag.store(true, Ordering::SeqCst)),
        )
        .await
        .unwrap();

    // First firing is at 500 ms; at 510 ms the loop has set the signal
    // and is sitting in its 40 ms settle delay, holding no lock.
    tokio::time::sleep(Duration::from_millis(510)).await;
    assert_eq!(sink_log.symbols.lock().unwrap().len(), 1);

    // Stop must not wait out the settle; the runtime is free to claim.
    session.force_stop().await;
    assert_eq!(session.state(), SessionState::Idle);
    assert!(released.load(Ordering::SeqCst));

    // The interrupted tick never pulled its frame or counted itself.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(session.completed_ticks(), 0);
    assert_eq!(sink_log.symbols.lock().unwrap().len(), 1);
    assert!(!completed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn starting_twice_is_rejected_while_active() {
    let released = Arc::new(AtomicBool::new(false));
    let (on_complete, _rx) = completion_channel();

    let mut session = CaptureSession::new(short_config());
    session
        .start(
            Box::new(TestSource::new(released.clone())),
            Box::new(RecordingSink {
                log: Arc::new(SinkLog::default()),
            }),
            Box::new(RawRgbaEncoder::new()),
            on_complete,
        )
        .await
        .unwrap();

    let (second_complete, _rx2) = completion_channel();
    let err = session
        .start(
            Box::new(TestSource::new(Arc::new(AtomicBool::new(false)))),
            Box::new(RecordingSink {
                log: Arc::new(SinkLog::default()),
            }),
            Box::new(RawRgbaEncoder::new()),
            second_complete,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BlinkcapError::Session { .. }));

    session.force_stop().await;
}

#[tokio::test(start_paused = true)]
async fn acquire_failure_rejects_start_and_releases() {
    let released = Arc::new(AtomicBool::new(false));
    let mut source = TestSource::new(released.clone());
    source.fail_acquire = true;
    let (on_complete, _rx) = completion_channel();

    let mut session = CaptureSession::new(short_config());
    let err = session
        .start(
            Box::new(source),
            Box::new(RecordingSink {
                log: Arc::new(SinkLog::default()),
            }),
            Box::new(RawRgbaEncoder::new()),
            on_complete,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, BlinkcapError::SourceUnavailable { .. }));
    assert_eq!(session.state(), SessionState::Idle);
    assert!(released.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn zero_dimensions_retry_once_then_fall_back() {
    let released = Arc::new(AtomicBool::new(false));
    let mut source = TestSource::new(released.clone());
    source.zero_dimensions = true;
    let probes = source.probes.clone();

    let seen = Arc::new(Mutex::new(None));
    let encoder = ConfigSpyEncoder {
        inner: RawRgbaEncoder::new(),
        seen: seen.clone(),
    };
    let (on_complete, rx) = completion_channel();

    let mut session = CaptureSession::new(short_config());
    session
        .start(
            Box::new(source),
            Box::new(RecordingSink {
                log: Arc::new(SinkLog::default()),
            }),
            Box::new(encoder),
            on_complete,
        )
        .await
        .unwrap();

    // Bounded policy: exactly one re-probe after the grace delay.
    assert_eq!(probes.load(Ordering::SeqCst), 2);
    let config = seen.lock().unwrap().expect("encoder was configured");
    assert_eq!((config.width, config.height), (320, 240));

    let units = rx.await.unwrap();
    assert_eq!(units.len(), 20);
}

#[tokio::test(start_paused = true)]
async fn configure_failure_rejects_start_and_releases_the_source() {
    let released = Arc::new(AtomicBool::new(false));
    let mut source = TestSource::new(released.clone());
    source.zero_dimensions = true;

    // A zero fallback resolution forces the encoder configure to fail.
    let mut config = short_config();
    config.fallback_dimensions = SourceDimensions::new(0, 0);
    let (on_complete, _rx) = completion_channel();

    let mut session = CaptureSession::new(config);
    let err = session
        .start(
            Box::new(source),
            Box::new(RecordingSink {
                log: Arc::new(SinkLog::default()),
            }),
            Box::new(RawRgbaEncoder::new()),
            on_complete,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, BlinkcapError::Configuration { .. }));
    assert_eq!(session.state(), SessionState::Idle);
    assert!(released.load(Ordering::SeqCst));
}
