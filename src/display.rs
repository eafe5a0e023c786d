//! Display-rate side of the pipeline
//!
//! The capture thread hands spectra and sample blocks to a [`DisplayFeed`].
//! [`run_display_loop`] drains them into a [`SpectrumDisplay`] and ticks its
//! smoother at the refresh rate, independent of how often windows complete.

use crate::audio::{CaptureEngine, CaptureSource};
use crate::config::AnalyzerConfig;
use crate::dsp::{
    create_smoother, AxisScale, DownSampler, MagnitudeSmoother, MaxTracker, RingBuffer,
    ScalarConfig, SharedScalar, SmootherKind, SpectrumFrame, UniformDownSampler,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Data forwarded from the capture thread
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayEvent {
    Spectrum(SpectrumFrame),
    Samples(Vec<f32>),
}

/// Forwards engine output into a channel for the display task
#[derive(Debug, Clone)]
pub struct DisplayFeed {
    tx: mpsc::UnboundedSender<DisplayEvent>,
}

impl DisplayFeed {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DisplayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Register spectrum and sample observers on `engine` that forward here.
    pub fn attach(&self, engine: &CaptureEngine) {
        let tx = self.tx.clone();
        engine.register_observer(move |magnitudes: &[f32], source: &CaptureSource| {
            let _ = tx.send(DisplayEvent::Spectrum(SpectrumFrame {
                magnitudes: magnitudes.to_vec(),
                sample_rate: source.sample_rate,
                window_size: magnitudes.len() * 2,
            }));
        });

        let tx = self.tx.clone();
        engine.register_sample_observer(move |samples: &[f32], _: &CaptureSource| {
            let _ = tx.send(DisplayEvent::Samples(samples.to_vec()));
        });
    }
}

/// Smoothed, scaled spectrum plus spectrogram and waveform history
pub struct SpectrumDisplay {
    scalar: SharedScalar,
    smoother: Box<dyn MagnitudeSmoother>,
    max_tracker: MaxTracker,
    spectrogram: RingBuffer<Vec<f32>>,
    waveform: RingBuffer<f32>,
    down_sampler: UniformDownSampler,
    scaled: Vec<f32>,
    max_frequency: u32,
    display_width: Option<usize>,
    frames: u64,
}

impl SpectrumDisplay {
    pub fn new(config: &AnalyzerConfig) -> Self {
        let bins = config.window_size / 2;
        Self {
            scalar: SharedScalar::new(config.scalar),
            smoother: create_smoother(config.smoother, bins, config.smoothing_factor),
            max_tracker: MaxTracker::new(bins),
            spectrogram: RingBuffer::new(config.history_rows, Vec::new()),
            waveform: RingBuffer::new(config.waveform_samples, 0.0),
            down_sampler: UniformDownSampler,
            scaled: Vec::with_capacity(bins),
            max_frequency: config.max_frequency,
            display_width: config.display_width,
            frames: 0,
        }
    }

    /// Handle for changing the scalar from another thread
    pub fn scalar(&self) -> SharedScalar {
        self.scalar.clone()
    }

    pub fn set_scalar(&self, config: ScalarConfig) {
        self.scalar.update(config);
    }

    pub fn axis_scale(&self) -> AxisScale {
        self.scalar.current().axis_scale()
    }

    /// Swap the smoothing policy, keeping the bin count.
    pub fn set_smoother(&mut self, kind: SmootherKind, factor: f64) {
        self.smoother = create_smoother(kind, self.smoother.len(), factor);
    }

    pub fn handle(&mut self, event: DisplayEvent) {
        match event {
            DisplayEvent::Spectrum(frame) => self.push_frame(&frame),
            DisplayEvent::Samples(samples) => self.push_samples(&samples),
        }
    }

    /// Feed one analysed window.
    pub fn push_frame(&mut self, frame: &SpectrumFrame) {
        let trimmed = frame.trimmed(self.max_frequency);
        if self.smoother.len() != trimmed.len() {
            log::debug!("Display resized to {} bins", trimmed.len());
            self.smoother.resize(trimmed.len());
            self.max_tracker.resize(trimmed.len());
        }

        self.scalar.scale_frame(trimmed, &mut self.scaled);
        self.smoother.set_data(&self.scaled);
        if let Err(e) = self.max_tracker.apply(&self.scaled) {
            log::warn!("Peak hold skipped a frame: {}", e);
        }
        self.spectrogram.insert(self.scaled.clone());
        self.frames += 1;
    }

    /// Extend the waveform history.
    pub fn push_samples(&mut self, samples: &[f32]) {
        self.waveform.insert_slice(samples);
    }

    /// Advance smoothing by `delta_t` seconds.
    pub fn tick(&mut self, delta_t: f64) {
        self.smoother.apply_smoothing(delta_t);
    }

    /// Current smoothed values
    pub fn levels(&self) -> &[f32] {
        self.smoother.data()
    }

    /// Smoothed values reduced to the display width
    pub fn bars(&self) -> Vec<f32> {
        match self.display_width {
            Some(width) => self.down_sampler.down_sample(self.smoother.data(), width),
            None => self.smoother.data().to_vec(),
        }
    }

    /// Highest scaled value per bin since the last reset
    pub fn peak_hold(&self) -> &[f32] {
        self.max_tracker.data()
    }

    pub fn reset_peak_hold(&mut self) {
        self.max_tracker.zero();
    }

    pub fn spectrogram(&self) -> &RingBuffer<Vec<f32>> {
        &self.spectrogram
    }

    pub fn waveform(&self) -> &RingBuffer<f32> {
        &self.waveform
    }

    /// Spectra received so far
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

/// Measures achieved frames per second over one-second windows
#[derive(Debug, Clone)]
pub struct FpsCounter {
    window_start: Instant,
    frames: u32,
    fps: f32,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
            fps: 0.0,
        }
    }

    /// Count a frame. Returns the new rate whenever a window completes.
    pub fn frame(&mut self, now: Instant) -> Option<f32> {
        self.frames += 1;
        let elapsed = now.duration_since(self.window_start);
        if elapsed < Duration::from_secs(1) {
            return None;
        }
        self.fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.window_start = now;
        Some(self.fps)
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }
}

/// Drive `display` until `shutdown_rx` fires, then hand it back.
///
/// Events are applied as they arrive; `on_frame` runs after every tick.
pub async fn run_display_loop<F>(
    mut display: SpectrumDisplay,
    mut events: mpsc::UnboundedReceiver<DisplayEvent>,
    refresh_rate: u32,
    mut shutdown_rx: mpsc::Receiver<()>,
    mut on_frame: F,
) -> SpectrumDisplay
where
    F: FnMut(&SpectrumDisplay, &FpsCounter),
{
    let period = Duration::from_secs_f64(1.0 / refresh_rate.max(1) as f64);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut last_tick = Instant::now();
    let mut fps = FpsCounter::new(last_tick);

    log::info!("Display loop started at {} Hz", refresh_rate);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                log::info!("Display loop received shutdown signal");
                break;
            }
            Some(event) = events.recv() => {
                display.handle(event);
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                display.tick(now.duration_since(last_tick).as_secs_f64());
                last_tick = now;
                if let Some(rate) = fps.frame(now) {
                    log::debug!("Display running at {:.1} fps", rate);
                }
                on_frame(&display, &fps);
            }
        }
    }

    display
}
