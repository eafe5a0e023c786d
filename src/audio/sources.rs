//! Capture source descriptors

use crate::dsp::spectrum::{
    bin_of_frequency, frequency_of_bin, max_frequency_for_rate, trim_result_buffer_to,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Source id of the default output device captured as loopback
pub const SYSTEM_AUDIO_ID: &str = "system_audio";

/// A resolved capture source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSource {
    /// Unique identifier for the source
    pub id: String,

    /// Display name
    pub name: String,

    pub sample_rate: u32,

    pub channels: u16,

    pub sample_format: SampleFormat,

    pub source_type: SourceType,
}

/// Type of capture source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// System-wide audio (loopback of an output device)
    SystemAudio,

    /// Input device (microphone, line in)
    InputDevice,

    /// Generated signal
    Synthetic,
}

/// Sample encoding delivered by the device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    F32,
    I16,
    U16,
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleFormat::F32 => "f32",
            SampleFormat::I16 => "i16",
            SampleFormat::U16 => "u16",
        };
        f.write_str(name)
    }
}

impl CaptureSource {
    /// Nyquist frequency of the source
    pub fn max_frequency(&self) -> u32 {
        max_frequency_for_rate(self.sample_rate)
    }

    /// Bins of an `fft_size` transform needed to reach `frequency`
    pub fn trim_result_to(&self, fft_size: usize, frequency: u32) -> usize {
        trim_result_buffer_to(fft_size, self.sample_rate, frequency)
    }

    pub fn bin_of_frequency(&self, fft_size: usize, frequency: f64) -> usize {
        bin_of_frequency(self.sample_rate, fft_size, frequency)
    }

    pub fn frequency_of_bin(&self, bin: usize, fft_size: usize) -> u32 {
        frequency_of_bin(bin, self.sample_rate, fft_size)
    }

    /// Lowest frequency a window of `samples` samples can resolve
    pub fn minimum_frequency(&self, samples: usize) -> u32 {
        if samples == 0 {
            return 0;
        }
        (self.sample_rate as f64 / samples as f64).round() as u32
    }

    /// Time it takes the source to deliver `samples` frames
    pub fn update_interval(&self, samples: usize) -> Duration {
        Duration::from_secs_f64(samples as f64 / self.sample_rate.max(1) as f64)
    }

    /// One-line summary for status displays, e.g.
    /// `48000Hz • f32 • x2 • 1024 [426] • 20Hz - 20000Hz`
    pub fn describe(&self, fft_size: usize, min_frequency: u32, max_frequency: u32) -> String {
        let visible = self
            .trim_result_to(fft_size, max_frequency)
            .saturating_sub(self.trim_result_to(fft_size, min_frequency));
        format!(
            "{}Hz • {} • x{} • {} [{}] • {}Hz - {}Hz",
            self.sample_rate,
            self.sample_format,
            self.channels,
            fft_size,
            visible,
            min_frequency,
            max_frequency
        )
    }
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {} Hz, {} ch, {})",
            self.name, self.id, self.sample_rate, self.channels, self.sample_format
        )
    }
}

/// Find a source by id.
pub fn find_source<'a>(sources: &'a [CaptureSource], id: &str) -> Option<&'a CaptureSource> {
    sources.iter().find(|s| s.id == id)
}

/// The system loopback source if present, otherwise the first listed.
pub fn default_source(sources: &[CaptureSource]) -> Option<&CaptureSource> {
    find_source(sources, SYSTEM_AUDIO_ID).or_else(|| sources.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(id: &str, rate: u32) -> CaptureSource {
        CaptureSource {
            id: id.to_string(),
            name: format!("Test {id}"),
            sample_rate: rate,
            channels: 2,
            sample_format: SampleFormat::F32,
            source_type: SourceType::InputDevice,
        }
    }

    #[test]
    fn derived_quantities_follow_the_rate() {
        let src = source("input:mic", 48000);

        assert_eq!(src.max_frequency(), 24000);
        assert_eq!(src.trim_result_to(1024, 20000), 427);
        assert_eq!(src.minimum_frequency(1024), 47);
        assert_eq!(src.minimum_frequency(0), 0);
        assert!((src.update_interval(480).as_secs_f64() - 0.01).abs() < 1e-9);
        assert_eq!(src.bin_of_frequency(1024, 1000.0), 21);
        assert_eq!(src.frequency_of_bin(21, 1024), 984);
    }

    #[test]
    fn describe_reports_visible_bins() {
        let src = source("input:mic", 48000);
        let text = src.describe(1024, 0, 20000);

        assert!(text.starts_with("48000Hz • f32 • x2 • 1024 [427]"));
    }

    #[test]
    fn lookup_prefers_system_audio() {
        let sources = vec![source("input:mic", 44100), source(SYSTEM_AUDIO_ID, 48000)];

        assert_eq!(find_source(&sources, "input:mic").unwrap().sample_rate, 44100);
        assert!(find_source(&sources, "missing").is_none());
        assert_eq!(default_source(&sources).unwrap().id, SYSTEM_AUDIO_ID);
        assert_eq!(default_source(&sources[..1]).unwrap().id, "input:mic");
        assert!(default_source(&[]).is_none());
    }
}
