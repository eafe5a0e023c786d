//! Generated sine source
//!
//! Useful without audio hardware: demos run off `SPECTRUM_TONE`, and the
//! integration tests drive the engine with it unpaced.

use super::backend::{CaptureBackend, CaptureStream, FrameBlock, FrameSink};
use super::capture::CaptureError;
use super::sources::{CaptureSource, SampleFormat, SourceType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Tone generator settings
#[derive(Debug, Clone, PartialEq)]
pub struct ToneConfig {
    /// Sine frequency in Hz
    pub frequency: f32,
    /// Peak amplitude, 1.0 is full scale
    pub amplitude: f32,
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per block
    pub block_size: usize,
    /// Sleep one block duration between blocks
    pub realtime: bool,
    /// Stop generating after this many blocks
    pub max_blocks: Option<u64>,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            frequency: 440.0,
            amplitude: 0.5,
            sample_rate: 48000,
            channels: 2,
            block_size: 480,
            realtime: true,
            max_blocks: None,
        }
    }
}

/// Backend exposing a single generated sine source
#[derive(Debug, Clone, Default)]
pub struct ToneBackend {
    config: ToneConfig,
}

impl ToneBackend {
    pub fn new(config: ToneConfig) -> Self {
        Self { config }
    }

    pub fn source(&self) -> CaptureSource {
        CaptureSource {
            id: format!("tone:{}", self.config.frequency),
            name: format!("Sine {} Hz", self.config.frequency),
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            sample_format: SampleFormat::F32,
            source_type: SourceType::Synthetic,
        }
    }
}

/// Interleaved sine block starting at frame `start`
fn tone_block(config: &ToneConfig, start: u64) -> Vec<f32> {
    let channels = config.channels.max(1) as usize;
    let step = 2.0 * std::f64::consts::PI * config.frequency as f64 / config.sample_rate as f64;
    let mut samples = Vec::with_capacity(config.block_size * channels);
    for frame in 0..config.block_size as u64 {
        let value = config.amplitude * ((start + frame) as f64 * step).sin() as f32;
        samples.extend(std::iter::repeat(value).take(channels));
    }
    samples
}

struct ToneStream {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureStream for ToneStream {
    fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ToneStream {
    fn drop(&mut self) {
        self.stop();
    }
}

impl CaptureBackend for ToneBackend {
    fn list_sources(&self) -> Result<Vec<CaptureSource>, CaptureError> {
        Ok(vec![self.source()])
    }

    fn open_stream(
        &self,
        source: &CaptureSource,
        sink: FrameSink,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        if *source != self.source() {
            return Err(CaptureError::DeviceUnavailable(format!(
                "Unknown source: {}",
                source.id
            )));
        }

        let config = self.config.clone();
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();
        let block_duration =
            Duration::from_secs_f64(config.block_size as f64 / config.sample_rate.max(1) as f64);

        let handle = thread::Builder::new()
            .name("tone-generator".to_string())
            .spawn(move || {
                let mut position = 0u64;
                let mut blocks = 0u64;
                while running_clone.load(Ordering::Relaxed) {
                    if config.max_blocks.is_some_and(|max| blocks >= max) {
                        break;
                    }
                    let block = FrameBlock {
                        samples: tone_block(&config, position),
                        channels: config.channels,
                    };
                    if !sink.push_wait(block) {
                        break;
                    }
                    position += config.block_size as u64;
                    blocks += 1;
                    if config.realtime {
                        thread::sleep(block_duration);
                    }
                }
                log::debug!("Tone generator finished after {} blocks", blocks);
            })
            .map_err(|e| CaptureError::ThreadError(e.to_string()))?;

        log::info!("Tone stream open: {} Hz", self.config.frequency);
        Ok(Box::new(ToneStream {
            running,
            handle: Some(handle),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::CaptureEvent;
    use std::sync::mpsc;

    #[test]
    fn blocks_are_interleaved_and_continuous() {
        let config = ToneConfig {
            frequency: 1000.0,
            amplitude: 1.0,
            sample_rate: 8000,
            channels: 2,
            block_size: 4,
            ..Default::default()
        };

        let first = tone_block(&config, 0);
        let second = tone_block(&config, 4);

        assert_eq!(first.len(), 8);
        assert_eq!(first[0], first[1]);
        // 1 kHz at 8 kHz: the fifth frame is half a period in
        assert!(second[0].abs() < 1e-5);
        assert!((first[4] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn stream_delivers_the_block_limit_then_stops() {
        let backend = ToneBackend::new(ToneConfig {
            realtime: false,
            max_blocks: Some(3),
            ..Default::default()
        });
        let (tx, rx) = mpsc::sync_channel(1);
        let mut stream = backend
            .open_stream(&backend.source(), FrameSink::new(tx))
            .unwrap();

        let mut blocks = 0;
        while let Ok(event) = rx.recv() {
            if let CaptureEvent::Block(block) = event {
                assert_eq!(block.samples.len(), 480 * 2);
                blocks += 1;
            }
        }
        stream.stop();

        assert_eq!(blocks, 3);
    }

    #[test]
    fn foreign_sources_are_rejected() {
        let backend = ToneBackend::default();
        let mut other = backend.source();
        other.id = "input:mic".to_string();
        let (tx, _rx) = mpsc::sync_channel(1);

        assert!(matches!(
            backend.open_stream(&other, FrameSink::new(tx)),
            Err(CaptureError::DeviceUnavailable(_))
        ));
    }
}
