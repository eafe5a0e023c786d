//! Audio device backends
//!
//! A backend enumerates [`CaptureSource`]s and opens streams that push
//! interleaved frame blocks into a [`FrameSink`]. Streams are opened and
//! dropped on the engine's capture thread, so they do not need to be `Send`
//! (cpal streams are not).

use super::capture::CaptureError;
use super::sources::{CaptureSource, SampleFormat, SourceType, SYSTEM_AUDIO_ID};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, StreamConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, TrySendError};
use std::sync::Arc;

/// Interleaved samples as delivered by the device
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBlock {
    pub samples: Vec<f32>,
    pub channels: u16,
}

/// Messages consumed by the capture thread
pub(crate) enum CaptureEvent {
    Block(FrameBlock),
    DeviceError(String),
    Stop,
}

/// Where a stream delivers its blocks.
///
/// The queue behind it is bounded. Real-time callbacks use [`FrameSink::push`],
/// which never blocks and drops the block when the capture thread is behind.
/// Generators that own their thread use [`FrameSink::push_wait`] instead.
#[derive(Clone)]
pub struct FrameSink {
    tx: mpsc::SyncSender<CaptureEvent>,
    overruns: Arc<AtomicU64>,
}

impl FrameSink {
    pub(crate) fn new(tx: mpsc::SyncSender<CaptureEvent>) -> Self {
        Self {
            tx,
            overruns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Hand a block to the engine without blocking. Returns `false` once the
    /// session is gone; a full queue drops the block and counts an overrun.
    pub fn push(&self, block: FrameBlock) -> bool {
        match self.tx.try_send(CaptureEvent::Block(block)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let count = self.overruns.fetch_add(1, Ordering::Relaxed) + 1;
                if count.is_power_of_two() {
                    log::warn!("Capture queue full, {} blocks dropped so far", count);
                }
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Hand a block to the engine, waiting for queue space.
    pub fn push_wait(&self, block: FrameBlock) -> bool {
        self.tx.send(CaptureEvent::Block(block)).is_ok()
    }

    /// Blocks dropped because the queue was full
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Report a fatal device error. The engine ends the session.
    pub fn error(&self, message: impl Into<String>) -> bool {
        self.tx.send(CaptureEvent::DeviceError(message.into())).is_ok()
    }
}

/// An open stream. Dropping it releases the device.
pub trait CaptureStream {
    /// Stop delivering blocks.
    fn stop(&mut self) {}
}

/// Source of capture streams
pub trait CaptureBackend: Send + Sync {
    fn list_sources(&self) -> Result<Vec<CaptureSource>, CaptureError>;

    /// Open a running stream on `source`.
    fn open_stream(
        &self,
        source: &CaptureSource,
        sink: FrameSink,
    ) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

/// System audio devices through cpal
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

struct CpalStream {
    stream: cpal::Stream,
}

impl CaptureStream for CpalStream {
    fn stop(&mut self) {
        if let Err(e) = self.stream.pause() {
            log::warn!("Failed to pause audio stream: {}", e);
        }
    }
}

fn convert_format(format: cpal::SampleFormat) -> Option<SampleFormat> {
    match format {
        cpal::SampleFormat::F32 => Some(SampleFormat::F32),
        cpal::SampleFormat::I16 => Some(SampleFormat::I16),
        cpal::SampleFormat::U16 => Some(SampleFormat::U16),
        _ => None,
    }
}

fn describe_device(
    device: &Device,
    id: String,
    name: String,
    source_type: SourceType,
) -> Option<CaptureSource> {
    // Loopback sources capture what the output device is producing
    let config = match source_type {
        SourceType::SystemAudio => device.default_output_config(),
        _ => device.default_input_config(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            log::warn!("Skipping {}: {}", id, e);
            return None;
        }
    };
    let Some(sample_format) = convert_format(config.sample_format()) else {
        log::debug!("Skipping {}: sample format {:?}", id, config.sample_format());
        return None;
    };

    Some(CaptureSource {
        id,
        name,
        sample_rate: config.sample_rate().0,
        channels: config.channels(),
        sample_format,
        source_type,
    })
}

fn find_named(
    devices: Result<impl Iterator<Item = Device>, cpal::DevicesError>,
    name: &str,
) -> Result<Device, CaptureError> {
    devices
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| CaptureError::DeviceUnavailable(format!("Device not found: {}", name)))
}

fn find_device(id: &str) -> Result<Device, CaptureError> {
    let host = cpal::default_host();

    if id == SYSTEM_AUDIO_ID {
        host.default_output_device()
            .ok_or_else(|| CaptureError::DeviceUnavailable("No output device found".to_string()))
    } else if let Some(name) = id.strip_prefix("output:") {
        find_named(host.output_devices(), name)
    } else if let Some(name) = id.strip_prefix("input:") {
        find_named(host.input_devices(), name)
    } else {
        Err(CaptureError::DeviceUnavailable(format!("Unknown source: {}", id)))
    }
}

impl CaptureBackend for CpalBackend {
    fn list_sources(&self) -> Result<Vec<CaptureSource>, CaptureError> {
        let mut sources = Vec::new();
        let host = cpal::default_host();

        let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

        // System audio loopback first (default output device)
        if let Some(device) = host.default_output_device() {
            let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            sources.extend(describe_device(
                &device,
                SYSTEM_AUDIO_ID.to_string(),
                format!("System Audio ({})", device_name),
                SourceType::SystemAudio,
            ));
        }

        match host.output_devices() {
            Ok(devices) => {
                for device in devices {
                    let Ok(name) = device.name() else { continue };
                    // Already listed as system audio
                    if default_output_name.as_deref() == Some(name.as_str()) {
                        continue;
                    }
                    sources.extend(describe_device(
                        &device,
                        format!("output:{}", name),
                        format!("Loopback: {}", name),
                        SourceType::SystemAudio,
                    ));
                }
            }
            Err(e) => log::warn!("Failed to enumerate output devices: {}", e),
        }

        match host.input_devices() {
            Ok(devices) => {
                for device in devices {
                    let Ok(name) = device.name() else { continue };
                    sources.extend(describe_device(
                        &device,
                        format!("input:{}", name),
                        format!("Input: {}", name),
                        SourceType::InputDevice,
                    ));
                }
            }
            Err(e) => log::warn!("Failed to enumerate input devices: {}", e),
        }

        log::info!("Found {} capture sources", sources.len());
        Ok(sources)
    }

    fn open_stream(
        &self,
        source: &CaptureSource,
        sink: FrameSink,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let device = find_device(&source.id)?;
        let config = StreamConfig {
            channels: source.channels,
            sample_rate: cpal::SampleRate(source.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match source.sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, sink),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, sink),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, sink),
        }
        .map_err(|e| build_error(e, source))?;

        stream.play().map_err(|e| match e {
            cpal::PlayStreamError::DeviceNotAvailable => {
                CaptureError::DeviceUnavailable(e.to_string())
            }
            other => CaptureError::StreamFailure(other.to_string()),
        })?;

        log::info!(
            "Audio stream open: {} Hz, {} channels",
            source.sample_rate,
            source.channels
        );
        Ok(Box::new(CpalStream { stream }))
    }
}

fn build_error(error: cpal::BuildStreamError, source: &CaptureSource) -> CaptureError {
    match error {
        cpal::BuildStreamError::DeviceNotAvailable => {
            CaptureError::DeviceUnavailable(error.to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported => CaptureError::UnsupportedFormat(format!(
            "{} Hz, {} ch, {}",
            source.sample_rate, source.channels, source.sample_format
        )),
        other => CaptureError::StreamFailure(other.to_string()),
    }
}

/// Build an input stream for the given sample type
fn build_stream<T: cpal::Sample + cpal::SizedSample>(
    device: &Device,
    config: &StreamConfig,
    sink: FrameSink,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    f32: cpal::FromSample<T>,
{
    let channels = config.channels;
    let error_sink = sink.clone();

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let samples: Vec<f32> = data
                .iter()
                .map(|s| cpal::Sample::from_sample(*s))
                .collect();
            sink.push(FrameBlock { samples, channels });
        },
        move |err| {
            log::error!("Audio stream error: {}", err);
            error_sink.error(err.to_string());
        },
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(len: usize) -> FrameBlock {
        FrameBlock {
            samples: vec![0.0; len],
            channels: 2,
        }
    }

    #[test]
    fn sink_reports_a_closed_session() {
        let (tx, rx) = mpsc::sync_channel(4);
        let sink = FrameSink::new(tx);

        assert!(sink.push(block(4)));
        assert!(matches!(rx.recv(), Ok(CaptureEvent::Block(b)) if b.samples.len() == 4));

        drop(rx);
        assert!(!sink.push(block(4)));
        assert!(!sink.error("gone"));
    }

    #[test]
    fn full_queue_drops_blocks_instead_of_growing() {
        let (tx, rx) = mpsc::sync_channel(2);
        let sink = FrameSink::new(tx);

        for len in 1..=5 {
            assert!(sink.push(block(len)));
        }
        assert_eq!(sink.overruns(), 3);

        // The oldest blocks are the ones kept
        let kept: Vec<usize> = rx
            .try_iter()
            .map(|event| match event {
                CaptureEvent::Block(b) => b.samples.len(),
                _ => 0,
            })
            .collect();
        assert_eq!(kept, vec![1, 2]);
        assert_eq!(sink.clone().overruns(), 3);
    }

    #[test]
    fn unsupported_stream_config_maps_to_unsupported_format() {
        let source = CaptureSource {
            id: "input:Mic".to_string(),
            name: "Input: Mic".to_string(),
            sample_rate: 44100,
            channels: 6,
            sample_format: SampleFormat::I16,
            source_type: SourceType::InputDevice,
        };

        match build_error(cpal::BuildStreamError::StreamConfigNotSupported, &source) {
            CaptureError::UnsupportedFormat(message) => {
                assert!(message.contains("44100 Hz"));
                assert!(message.contains("6 ch"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            build_error(cpal::BuildStreamError::DeviceNotAvailable, &source),
            CaptureError::DeviceUnavailable(_)
        ));
        assert!(matches!(
            build_error(cpal::BuildStreamError::InvalidArgument, &source),
            CaptureError::StreamFailure(_)
        ));
    }

    #[test]
    fn only_plain_pcm_formats_are_supported() {
        assert_eq!(convert_format(cpal::SampleFormat::F32), Some(SampleFormat::F32));
        assert_eq!(convert_format(cpal::SampleFormat::I16), Some(SampleFormat::I16));
        assert_eq!(convert_format(cpal::SampleFormat::U16), Some(SampleFormat::U16));
        assert_eq!(convert_format(cpal::SampleFormat::F64), None);
    }

    #[test]
    fn unknown_source_ids_are_unavailable() {
        assert!(matches!(
            find_device("bogus"),
            Err(CaptureError::DeviceUnavailable(_))
        ));
    }
}
