//! Capture engine running the analysis on a dedicated thread
//!
//! The engine owns one capture thread per session. The backend stream pushes
//! frame blocks into a bounded queue; the thread splits them into a master
//! (downmixed) channel plus one channel per device input, slides each through
//! its accumulation buffer and, every time a window completes, runs
//! window → transform → peak tracking and notifies the observers in order.
//!
//! Channel 0 is always the master mix. Channel `n` is device input `n - 1`.
//! Inputs are only transformed while an observer listens to them.

use super::backend::{CaptureBackend, CaptureEvent, CaptureStream, FrameBlock, FrameSink};
use super::sources::CaptureSource;
use crate::config::AnalyzerConfig;
use crate::dsp::spectrum::{peak_bin, validate_window_size};
use crate::dsp::{
    level_db, DspError, PeakInterpolator, RingBuffer, SpectrumTransform, WindowFunction,
    WindowKind,
};
use crate::state::{CaptureState, EngineStatus, PeakReading};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Index of the downmixed channel
pub const MASTER_CHANNEL: usize = 0;

/// Peaks below this are reported as silence
const SILENCE_THRESHOLD: f32 = 1e-5;

/// Capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Stream failure: {0}")]
    StreamFailure(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Thread error: {0}")]
    ThreadError(String),

    #[error(transparent)]
    Dsp(DspError),
}

impl From<DspError> for CaptureError {
    fn from(e: DspError) -> Self {
        match e {
            DspError::InvalidConfiguration(message) => CaptureError::InvalidConfiguration(message),
            other => CaptureError::Dsp(other),
        }
    }
}

/// Receives every completed spectrum of its channel, on the capture thread
pub trait SpectrumObserver: Send {
    fn on_spectrum(&mut self, magnitudes: &[f32], source: &CaptureSource);
}

impl<F> SpectrumObserver for F
where
    F: FnMut(&[f32], &CaptureSource) + Send,
{
    fn on_spectrum(&mut self, magnitudes: &[f32], source: &CaptureSource) {
        self(magnitudes, source)
    }
}

/// Receives every block of its channel, on the capture thread
pub trait SampleObserver: Send {
    fn on_samples(&mut self, samples: &[f32], source: &CaptureSource);
}

impl<F> SampleObserver for F
where
    F: FnMut(&[f32], &CaptureSource) + Send,
{
    fn on_samples(&mut self, samples: &[f32], source: &CaptureSource) {
        self(samples, source)
    }
}

type ErrorObserver = Box<dyn FnMut(&CaptureError) + Send>;

/// State shared between the engine handle and its capture thread
#[derive(Default)]
struct Shared {
    status: Mutex<EngineStatus>,
    observers: Mutex<Vec<(usize, Box<dyn SpectrumObserver>)>>,
    sample_observers: Mutex<Vec<(usize, Box<dyn SampleObserver>)>>,
    error_observers: Mutex<Vec<ErrorObserver>>,
    paused: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: CaptureState) {
        self.status.lock().state = state;
    }

    /// End a session on a fatal error: state goes straight to Idle, then the
    /// error observers hear about it.
    fn fail(&self, error: CaptureError) {
        log::error!("Capture failed: {}", error);
        {
            let mut status = self.status.lock();
            status.state = CaptureState::Idle;
            status.error = Some(error.to_string());
        }
        for observer in self.error_observers.lock().iter_mut() {
            observer(&error);
        }
    }
}

/// A running capture session
struct Session {
    command_tx: mpsc::SyncSender<CaptureEvent>,
    thread_handle: Option<JoinHandle<()>>,
    source: CaptureSource,
}

/// Blocks the capture queue holds before device callbacks start dropping them
fn queue_depth(window_size: usize) -> usize {
    (window_size / 64).clamp(16, 1024)
}

/// Average interleaved frames down to mono, replacing the contents of `mono`.
/// A trailing partial frame is ignored.
pub fn downmix(interleaved: &[f32], channels: u16, mono: &mut Vec<f32>) {
    mono.clear();
    let channels = channels.max(1) as usize;
    if channels == 1 {
        mono.extend_from_slice(interleaved);
        return;
    }
    mono.extend(interleaved.chunks_exact(channels).map(|frame| {
        let sum: f32 = frame.iter().sum();
        sum / channels as f32
    }));
}

/// Accumulation and latest output of one channel
struct ChannelStore {
    accumulation: RingBuffer<f32>,
    samples: Vec<f32>,
    magnitudes: Vec<f32>,
}

impl ChannelStore {
    fn new(window_size: usize) -> Self {
        Self {
            accumulation: RingBuffer::new(window_size, 0.0),
            samples: Vec::new(),
            magnitudes: Vec::with_capacity(window_size / 2),
        }
    }
}

/// Per-session analysis state, owned by the capture thread
struct Analysis {
    /// Master first, then one store per device input
    channels: Vec<ChannelStore>,
    inputs: u16,
    window: WindowFunction,
    transform: SpectrumTransform,
    block: Vec<f32>,
    interleaved: Vec<f32>,
    /// Samples of a frame split across two blocks
    pending: Vec<f32>,
    hop: u64,
    normalization: f32,
    interpolator: PeakInterpolator,
    last_peak_frequency: f32,
}

impl Analysis {
    fn new(config: &AnalyzerConfig, source: &CaptureSource) -> Result<Self, DspError> {
        let size = config.window_size;
        let window = WindowFunction::new(config.window_kind, size);
        let normalization = if config.normalize_amplitude && window.sum() > 0.0 {
            2.0 / window.sum()
        } else {
            1.0
        };
        let inputs = source.channels.max(1);

        Ok(Self {
            channels: (0..=inputs).map(|_| ChannelStore::new(size)).collect(),
            inputs,
            window,
            transform: SpectrumTransform::new(size)?,
            block: vec![0.0; size],
            interleaved: Vec::new(),
            pending: Vec::new(),
            hop: config.hop_size(source.sample_rate) as u64,
            normalization,
            interpolator: config.interpolator,
            last_peak_frequency: 0.0,
        })
    }

    /// Rebuild the channel stores when a stream delivers a different layout.
    fn set_inputs(&mut self, inputs: u16) {
        log::debug!("Stream switched from {} to {} channels", self.inputs, inputs);
        let size = self.block.len();
        self.channels = (0..=inputs).map(|_| ChannelStore::new(size)).collect();
        self.inputs = inputs;
        self.pending.clear();
    }

    fn process(
        &mut self,
        block: &FrameBlock,
        shared: &Shared,
        source: &CaptureSource,
    ) -> Result<(), DspError> {
        if shared.paused.load(Ordering::Relaxed) {
            self.pending.clear();
            return Ok(());
        }

        let inputs = block.channels.max(1);
        if inputs != self.inputs {
            self.set_inputs(inputs);
        }
        let width = inputs as usize;

        self.interleaved.clear();
        self.interleaved.append(&mut self.pending);
        self.interleaved.extend_from_slice(&block.samples);
        let whole = self.interleaved.len() / width * width;
        if whole < self.interleaved.len() {
            log::debug!(
                "Carrying {} samples of a split frame",
                self.interleaved.len() - whole
            );
            self.pending.extend_from_slice(&self.interleaved[whole..]);
        }
        if whole == 0 {
            return Ok(());
        }

        let frames = &self.interleaved[..whole];
        let (master, device_inputs) = self.channels.split_at_mut(1);
        downmix(frames, inputs, &mut master[0].samples);
        for (offset, store) in device_inputs.iter_mut().enumerate() {
            store.samples.clear();
            store
                .samples
                .extend(frames.iter().skip(offset).step_by(width).copied());
        }

        {
            let mut status = shared.status.lock();
            status.level_db = level_db(&self.channels[MASTER_CHANNEL].samples);
            status.channel_levels.clear();
            status
                .channel_levels
                .extend(self.channels.iter().map(|store| level_db(&store.samples)));
        }
        for (channel, observer) in shared.sample_observers.lock().iter_mut() {
            if let Some(store) = self.channels.get(*channel) {
                observer.on_samples(&store.samples, source);
            }
        }

        let window_size = self.block.len() as u64;
        let frame_count = self.channels[MASTER_CHANNEL].samples.len();
        for i in 0..frame_count {
            for store in self.channels.iter_mut() {
                let value = store.samples[i];
                store.accumulation.insert(value);
            }
            let written = self.channels[MASTER_CHANNEL].accumulation.written();
            if written >= window_size && (written - window_size) % self.hop == 0 {
                self.analyse(shared, source)?;
            }
        }
        Ok(())
    }

    fn analyse(&mut self, shared: &Shared, source: &CaptureSource) -> Result<(), DspError> {
        let mut observers = shared.observers.lock();

        for channel in 0..self.channels.len() {
            let listened = observers.iter().any(|(c, _)| *c == channel);
            if channel == MASTER_CHANNEL || listened {
                self.transform_channel(channel)?;
            }
        }

        let peak = self.peak(source.sample_rate);
        {
            let mut status = shared.status.lock();
            status.peak = peak;
            status.frames_analyzed += 1;
        }

        for (channel, observer) in observers.iter_mut() {
            if let Some(store) = self.channels.get(*channel) {
                observer.on_spectrum(&store.magnitudes, source);
            }
        }
        Ok(())
    }

    fn transform_channel(&mut self, channel: usize) -> Result<(), DspError> {
        let store = &mut self.channels[channel];
        store.accumulation.copy_into(&mut self.block)?;
        self.window.apply(&mut self.block)?;
        let raw = self.transform.transform(&self.block)?;

        let normalization = self.normalization;
        store.magnitudes.clear();
        store.magnitudes.extend(raw.iter().map(|m| m * normalization));
        Ok(())
    }

    /// Peak of the master channel
    fn peak(&mut self, rate: u32) -> PeakReading {
        let magnitudes = &self.channels[MASTER_CHANNEL].magnitudes;
        let Some(index) = peak_bin(magnitudes) else {
            return PeakReading::default();
        };
        let magnitude = magnitudes[index];
        if magnitude < SILENCE_THRESHOLD {
            return PeakReading {
                frequency: self.last_peak_frequency,
                magnitude: 0.0,
            };
        }

        self.last_peak_frequency = self.interpolator.calc_peak(magnitudes, index, rate);
        PeakReading {
            frequency: self.last_peak_frequency,
            magnitude,
        }
    }
}

/// Drain the event queue until a stop signal, a device error or the engine
/// going away.
fn run_capture_loop(
    command_rx: mpsc::Receiver<CaptureEvent>,
    mut stream: Box<dyn CaptureStream>,
    mut analysis: Analysis,
    shared: Arc<Shared>,
    source: CaptureSource,
) {
    let failure = loop {
        match command_rx.recv() {
            Ok(CaptureEvent::Block(block)) => {
                if let Err(e) = analysis.process(&block, &shared, &source) {
                    break Some(CaptureError::from(e));
                }
            }
            Ok(CaptureEvent::DeviceError(message)) => {
                break Some(CaptureError::StreamFailure(message));
            }
            Ok(CaptureEvent::Stop) => {
                log::info!("Audio capture stopping");
                break None;
            }
            Err(_) => {
                log::info!("Audio capture channel disconnected");
                break None;
            }
        }
    };

    // Close the queue first so a producer waiting for space wakes up, then
    // release the device before reporting anything
    drop(command_rx);
    stream.stop();
    drop(stream);

    match failure {
        Some(error) => shared.fail(error),
        None => shared.set_state(CaptureState::Idle),
    }
}

/// Audio capture engine
///
/// Configuration changes are only accepted while no session is running.
/// Dropping the engine stops any running session.
pub struct CaptureEngine {
    backend: Arc<dyn CaptureBackend>,
    config: AnalyzerConfig,
    shared: Arc<Shared>,
    session: Option<Session>,
}

impl CaptureEngine {
    pub fn new(backend: Arc<dyn CaptureBackend>, config: AnalyzerConfig) -> Result<Self, CaptureError> {
        validate_window_size(config.window_size)?;
        let shared = Arc::new(Shared::default());
        shared.status.lock().window_size = config.window_size;

        Ok(Self {
            backend,
            config,
            shared,
            session: None,
        })
    }

    pub fn list_sources(&self) -> Result<Vec<CaptureSource>, CaptureError> {
        self.backend.list_sources()
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn state(&self) -> CaptureState {
        self.shared.status.lock().state
    }

    pub fn status(&self) -> EngineStatus {
        self.shared.status.lock().clone()
    }

    /// Strongest frequency of the latest window
    pub fn peak(&self) -> PeakReading {
        self.shared.status.lock().peak
    }

    /// RMS level of the latest block in dBFS
    pub fn level_db(&self) -> f32 {
        self.shared.status.lock().level_db
    }

    /// Message of the error that ended the last session, if any
    pub fn last_error(&self) -> Option<String> {
        self.shared.status.lock().error.clone()
    }

    pub fn window_size(&self) -> usize {
        self.config.window_size
    }

    /// Source of the running session
    pub fn current_source(&self) -> Option<&CaptureSource> {
        self.session.as_ref().map(|s| &s.source)
    }

    /// Observe master channel spectra.
    pub fn register_observer(&self, observer: impl SpectrumObserver + 'static) {
        self.register_channel_observer(MASTER_CHANNEL, observer);
    }

    /// Observe the spectra of one channel. Observers of a channel the source
    /// does not have are never called.
    pub fn register_channel_observer(
        &self,
        channel: usize,
        observer: impl SpectrumObserver + 'static,
    ) {
        self.shared.observers.lock().push((channel, Box::new(observer)));
    }

    /// Observe master channel sample blocks.
    pub fn register_sample_observer(&self, observer: impl SampleObserver + 'static) {
        self.register_channel_sample_observer(MASTER_CHANNEL, observer);
    }

    pub fn register_channel_sample_observer(
        &self,
        channel: usize,
        observer: impl SampleObserver + 'static,
    ) {
        self.shared
            .sample_observers
            .lock()
            .push((channel, Box::new(observer)));
    }

    pub fn register_error_observer(&self, observer: impl FnMut(&CaptureError) + Send + 'static) {
        self.shared.error_observers.lock().push(Box::new(observer));
    }

    /// RMS level of the latest block per channel in dBFS, master first
    pub fn channel_levels(&self) -> Vec<f32> {
        self.shared.status.lock().channel_levels.clone()
    }

    /// Drop incoming blocks while `paused`, keeping the session open.
    pub fn set_paused(&self, paused: bool) {
        if self.shared.paused.swap(paused, Ordering::Relaxed) != paused {
            log::info!("Capture {}", if paused { "paused" } else { "resumed" });
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Relaxed)
    }

    /// Join a session whose thread already ended on its own.
    fn reap_finished_session(&mut self) {
        if self.session.is_some() && self.state().is_idle() {
            if let Some(mut session) = self.session.take() {
                if let Some(handle) = session.thread_handle.take() {
                    if handle.join().is_err() {
                        log::error!("Capture thread panicked");
                    }
                }
            }
        }
    }

    fn ensure_idle(&mut self, action: &str) -> Result<(), CaptureError> {
        self.reap_finished_session();
        if self.session.is_some() {
            return Err(CaptureError::InvalidConfiguration(format!(
                "cannot {action} while capturing"
            )));
        }
        Ok(())
    }

    /// Change the analysis window. Only valid while idle.
    pub fn set_scan_window_size(&mut self, size: usize) -> Result<(), CaptureError> {
        self.ensure_idle("change the window size")?;
        validate_window_size(size)?;
        log::info!("Using window size {}", size);
        self.config.window_size = size;
        self.shared.status.lock().window_size = size;
        Ok(())
    }

    /// Change the window function. Only valid while idle.
    pub fn set_window_kind(&mut self, kind: WindowKind) -> Result<(), CaptureError> {
        self.ensure_idle("change the window function")?;
        log::info!("Using window function {:?}", kind);
        self.config.window_kind = kind;
        Ok(())
    }

    /// Replace the whole configuration. Only valid while idle.
    pub fn configure(&mut self, config: AnalyzerConfig) -> Result<(), CaptureError> {
        self.ensure_idle("reconfigure")?;
        config
            .validate()
            .map_err(|e| CaptureError::InvalidConfiguration(e.to_string()))?;
        self.shared.status.lock().window_size = config.window_size;
        self.config = config;
        Ok(())
    }

    /// Start capturing from `source`.
    ///
    /// Returns once the stream is open; a device that cannot be opened fails
    /// here rather than on the capture thread.
    pub fn start_capture(&mut self, source: CaptureSource) -> Result<(), CaptureError> {
        self.ensure_idle("start a second capture")?;
        validate_window_size(self.config.window_size)?;

        let analysis = Analysis::new(&self.config, &source)?;

        {
            let mut status = self.shared.status.lock();
            status.state = CaptureState::Starting;
            status.source_id = Some(source.id.clone());
            status.error = None;
            status.frames_analyzed = 0;
            status.peak = PeakReading::default();
            status.level_db = f32::NEG_INFINITY;
            status.channel_levels.clear();
        }

        let (command_tx, command_rx) = mpsc::sync_channel(queue_depth(self.config.window_size));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();
        let sink = FrameSink::new(command_tx.clone());
        let backend = self.backend.clone();
        let shared = self.shared.clone();
        let thread_source = source.clone();

        let spawned = thread::Builder::new()
            .name("spectrum-capture".to_string())
            .spawn(move || {
                let stream = match backend.open_stream(&thread_source, sink) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                shared.set_state(CaptureState::Capturing);
                let _ = ready_tx.send(Ok(()));
                run_capture_loop(command_rx, stream, analysis, shared, thread_source);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.set_state(CaptureState::Idle);
                return Err(CaptureError::ThreadError(e.to_string()));
            }
        };

        let opened = ready_rx.recv().unwrap_or_else(|_| {
            Err(CaptureError::ThreadError(
                "capture thread exited during startup".to_string(),
            ))
        });

        match opened {
            Ok(()) => {
                log::info!("Audio capture started: {}", source);
                self.session = Some(Session {
                    command_tx,
                    thread_handle: Some(handle),
                    source,
                });
                Ok(())
            }
            Err(e) => {
                if handle.join().is_err() {
                    log::error!("Capture thread panicked");
                }
                log::error!("Failed to start capture on {}: {}", source.id, e);
                let mut status = self.shared.status.lock();
                status.state = CaptureState::Idle;
                status.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Stop the running session and wait for the capture thread to exit.
    /// Does nothing when already stopped.
    pub fn stop_capture(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        log::info!("Stopping capture");
        {
            let mut status = self.shared.status.lock();
            if !status.state.is_idle() {
                status.state = CaptureState::Stopping;
            }
        }

        let _ = session.command_tx.send(CaptureEvent::Stop);
        if let Some(handle) = session.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("Capture thread panicked");
            }
        }
        self.shared.set_state(CaptureState::Idle);
    }

    /// Stop and start again on the current source.
    pub fn restart_capture(&mut self) -> Result<(), CaptureError> {
        let Some(source) = self.current_source().cloned() else {
            return Ok(());
        };
        self.stop_capture();
        self.start_capture(source)
    }

    /// Switch to `source`. Does nothing if it is already being captured.
    pub fn change_source(&mut self, source: CaptureSource) -> Result<(), CaptureError> {
        self.reap_finished_session();
        if self.current_source() == Some(&source) {
            return Ok(());
        }
        self.stop_capture();
        self.start_capture(source)
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop_capture();
    }
}
