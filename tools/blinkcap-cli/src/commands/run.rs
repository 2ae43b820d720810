//! Run a full capture-and-reconstruct session.

use std::path::PathBuf;
use std::time::Duration;

use blinkcap_capture_engine::{
    AnsiSignalSink, CaptureSession, EncodeService, EncodedUnit, FrameSource, RawRgbaEncoder,
    SessionConfig, SignalSink, SyntheticSource,
};
use blinkcap_common::config::AppConfig;
use blinkcap_render_engine::{DecoderFactory, MaterializeOutcome, Materializer, RawRgbaDecoderFactory};

pub async fn run(
    pattern: Option<String>,
    duration_ms: Option<u64>,
    settle_ms: Option<u64>,
    output: PathBuf,
    synthetic: bool,
    device: Option<String>,
) -> anyhow::Result<()> {
    let app_config = AppConfig::load();
    let mut config = SessionConfig::from_defaults(&app_config.capture);
    if let Some(pattern) = pattern {
        config.pattern = pattern;
    }
    if let Some(ms) = duration_ms {
        config.total_duration = Duration::from_millis(ms);
    }
    if let Some(ms) = settle_ms {
        config.settle = Duration::from_millis(ms);
    }

    println!("Starting capture session");
    println!("  Pattern: {} ({} steps)", config.pattern, config.pattern.len());
    println!("  Duration: {} ms", config.total_duration.as_millis());
    println!("  Output: {}", output.display());
    println!();

    let (source, encoder, factory) = build_backends(synthetic, device)?;
    let sink: Box<dyn SignalSink> = Box::new(AnsiSignalSink::stdout());

    let (tx, rx) = tokio::sync::oneshot::channel::<Vec<EncodedUnit>>();
    let mut session = CaptureSession::new(config);
    session
        .start(
            source,
            sink,
            encoder,
            Box::new(move |units| {
                let _ = tx.send(units);
            }),
        )
        .await?;

    println!("Capturing... press Ctrl+C to abort");

    let units = tokio::select! {
        units = rx => match units {
            Ok(units) => units,
            Err(_) => anyhow::bail!("Capture session ended without delivering units"),
        },
        _ = tokio::signal::ctrl_c() => {
            session.force_stop().await;
            println!();
            println!("Capture aborted");
            return Ok(());
        }
    };

    println!("Captured {} encoded units", units.len());
    materialize_units(&units, factory.as_ref(), &output).await?;
    Ok(())
}

fn build_backends(
    synthetic: bool,
    device: Option<String>,
) -> anyhow::Result<(
    Box<dyn FrameSource>,
    Box<dyn EncodeService>,
    Box<dyn DecoderFactory>,
)> {
    if synthetic {
        return Ok((
            Box::new(SyntheticSource::new(1280, 720)),
            Box::new(RawRgbaEncoder::new()),
            Box::new(RawRgbaDecoderFactory),
        ));
    }

    #[cfg(feature = "gst")]
    {
        use blinkcap_capture_engine::gst::{GstCameraSource, GstVp8Encoder};
        use blinkcap_render_engine::gst::GstVp8DecoderFactory;
        Ok((
            Box::new(GstCameraSource::new(device)),
            Box::new(GstVp8Encoder::new()),
            Box::new(GstVp8DecoderFactory),
        ))
    }
    #[cfg(not(feature = "gst"))]
    {
        let _ = device;
        anyhow::bail!("Live capture requires the gst feature; rerun with --synthetic")
    }
}

async fn materialize_units(
    units: &[EncodedUnit],
    factory: &dyn DecoderFactory,
    output: &PathBuf,
) -> anyhow::Result<()> {
    if units.is_empty() {
        println!("No encoded units to reconstruct.");
        return Ok(());
    }

    std::fs::create_dir_all(output)?;

    let materializer = Materializer::new(FactoryRef(factory));
    let mut batch = materializer.materialize(units);
    let mut decoded = 0usize;

    while let Some((index, outcome)) = batch.next().await {
        let unit = &units[index];
        match outcome {
            MaterializeOutcome::Image(still) => {
                let path = output.join(format!("frame_{index:02}.png"));
                std::fs::write(&path, &still.png)?;
                println!(
                    "Unit #{index}: timestamp={} us, kind={:?}, size={} bytes -> {}",
                    unit.timestamp_us,
                    unit.kind,
                    unit.payload.len(),
                    path.display()
                );
                decoded += 1;
            }
            MaterializeOutcome::Undecodable { reason } => {
                println!(
                    "Unit #{index}: timestamp={} us, kind={:?}, size={} bytes (could not decode: {reason})",
                    unit.timestamp_us,
                    unit.kind,
                    unit.payload.len(),
                );
            }
        }
    }

    println!();
    println!("Reconstructed {decoded}/{} units", units.len());
    Ok(())
}

/// Borrow adapter so the materializer can take the factory by value.
struct FactoryRef<'a>(&'a dyn DecoderFactory);

impl blinkcap_render_engine::DecoderFactory for FactoryRef<'_> {
    fn create(
        &self,
    ) -> blinkcap_common::error::BlinkcapResult<Box<dyn blinkcap_render_engine::DecodeService>>
    {
        self.0.create()
    }
}
