//! Spectrum Pipeline Library
//!
//! Real-time audio capture, FFT analysis and display-rate smoothing of the
//! resulting spectrum.

pub mod audio;
pub mod config;
pub mod display;
pub mod dsp;
pub mod state;

use anyhow::Context;
use audio::{default_source, CaptureBackend, CaptureEngine, CpalBackend, ToneBackend, ToneConfig};
use config::AnalyzerConfig;
use display::{run_display_loop, DisplayFeed, SpectrumDisplay};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Environment variable selecting the generated sine source, in Hz
pub const TONE_ENV: &str = "SPECTRUM_TONE";

fn select_backend() -> anyhow::Result<Arc<dyn CaptureBackend>> {
    match std::env::var(TONE_ENV) {
        Ok(value) => {
            let frequency: f32 = value
                .parse()
                .with_context(|| format!("{} must be a frequency in Hz, got {:?}", TONE_ENV, value))?;
            log::info!("Using generated {} Hz tone", frequency);
            Ok(Arc::new(ToneBackend::new(ToneConfig {
                frequency,
                ..Default::default()
            })))
        }
        Err(_) => Ok(Arc::new(CpalBackend)),
    }
}

/// Capture the default source and run the display loop until Ctrl-C.
///
/// The first command line argument, if any, is a JSON config file.
pub fn run() -> anyhow::Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => AnalyzerConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => AnalyzerConfig::default(),
    };

    let mut engine = CaptureEngine::new(select_backend()?, config.clone())?;
    let sources = engine.list_sources()?;
    let source = default_source(&sources)
        .cloned()
        .context("No capture source available")?;
    log::info!(
        "Capturing {}: {}",
        source.name,
        source.describe(config.window_size, 0, config.max_frequency)
    );

    let (feed, events) = DisplayFeed::new();
    feed.attach(&engine);
    engine.register_error_observer(|e| log::error!("Capture stopped: {}", e));
    engine.start_capture(source)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let report_every = config.refresh_rate.max(1) as u64;
    let mut ticks = 0u64;

    runtime.block_on(async {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(()).await;
            }
        });

        let display = SpectrumDisplay::new(&config);
        run_display_loop(display, events, config.refresh_rate, shutdown_rx, |display, fps| {
            ticks += 1;
            if ticks % report_every != 0 {
                return;
            }
            let peak = engine.peak();
            let loudest = display.bars().into_iter().fold(0.0f32, f32::max);
            let channels: Vec<String> = engine
                .channel_levels()
                .iter()
                .skip(1)
                .map(|level| format!("{:.1}", level))
                .collect();
            log::info!(
                "peak {:.1} Hz ({:.4}), level {:.1} dBFS [{}], loudest bar {:.2}, {:.1} fps",
                peak.frequency,
                peak.magnitude,
                engine.level_db(),
                channels.join(" "),
                loudest,
                fps.fps()
            );
        })
        .await
    });

    engine.stop_capture();
    Ok(())
}
