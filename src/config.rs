//! Analyzer configuration
//!
//! Everything the pipeline can be tuned with lives in [`AnalyzerConfig`].
//! Missing fields fall back to the defaults, so a config file only needs to
//! name what it changes.

use crate::dsp::spectrum::validate_window_size;
use crate::dsp::{PeakInterpolator, ScalarConfig, SmootherKind, WindowKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Analysis window in samples, a power of two from 256 to 65536
    pub window_size: usize,

    pub window_kind: WindowKind,

    /// Transforms per second. `None` analyses disjoint windows; a rate
    /// higher than `sample_rate / window_size` overlaps them.
    pub fft_rate: Option<u32>,

    /// Scale magnitudes so a full-scale sine reads about 1.0
    pub normalize_amplitude: bool,

    pub smoother: SmootherKind,

    /// Smoother responsiveness, 0 to 1
    pub smoothing_factor: f64,

    pub scalar: ScalarConfig,

    pub interpolator: PeakInterpolator,

    /// Display ticks per second
    pub refresh_rate: u32,

    /// Highest frequency shown, in Hz
    pub max_frequency: u32,

    /// Number of bars to reduce the spectrum to, if any
    pub display_width: Option<usize>,

    /// Spectrogram rows kept
    pub history_rows: usize,

    /// Waveform samples kept
    pub waveform_samples: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            window_size: 1024,
            window_kind: WindowKind::Hamming,
            fft_rate: None,
            normalize_amplitude: true,
            smoother: SmootherKind::Falloff,
            smoothing_factor: 0.91,
            scalar: ScalarConfig::default(),
            interpolator: PeakInterpolator::Parabolic,
            refresh_rate: 60,
            max_frequency: 20000,
            display_width: None,
            history_rows: 256,
            waveform_samples: 4096,
        }
    }
}

impl AnalyzerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        log::info!("Loading config from {}", path.display());
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_window_size(self.window_size)
            .map_err(|e| ConfigError::InvalidConfiguration(e.to_string()))?;

        if !(0.0..=1.0).contains(&self.smoothing_factor) {
            return Err(ConfigError::InvalidConfiguration(format!(
                "smoothing factor {} must be between 0 and 1",
                self.smoothing_factor
            )));
        }
        if self.refresh_rate == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "refresh rate must be positive".to_string(),
            ));
        }
        if self.fft_rate == Some(0) {
            return Err(ConfigError::InvalidConfiguration(
                "fft rate must be positive".to_string(),
            ));
        }
        if let ScalarConfig::Decibel {
            range_min,
            range_max,
        } = self.scalar
        {
            if range_min >= range_max {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "decibel range {range_min}..{range_max} is empty"
                )));
            }
        }
        if self.history_rows == 0 || self.waveform_samples == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "history sizes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Samples between the starts of consecutive analysis windows at `rate`
    pub fn hop_size(&self, rate: u32) -> usize {
        match self.fft_rate {
            Some(fft_rate) if fft_rate > 0 => {
                ((rate / fft_rate) as usize).clamp(1, self.window_size)
            }
            _ => self.window_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AnalyzerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window_size, 1024);
        assert_eq!(config.window_kind, WindowKind::Hamming);
        assert_eq!(config.smoothing_factor, 0.91);
        assert_eq!(
            config.scalar,
            ScalarConfig::Decibel {
                range_min: -90.0,
                range_max: 5.0
            }
        );
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config = AnalyzerConfig::from_json_str(
            r#"{ "window_size": 4096, "window_kind": "blackman_harris", "smoother": "multiplicative" }"#,
        )
        .unwrap();

        assert_eq!(config.window_size, 4096);
        assert_eq!(config.window_kind, WindowKind::BlackmanHarris);
        assert_eq!(config.smoother, SmootherKind::Multiplicative);
        assert_eq!(config.refresh_rate, 60);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            AnalyzerConfig::from_json_str(r#"{ "window_size": 1000 }"#),
            Err(ConfigError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            AnalyzerConfig::from_json_str(r#"{ "smoothing_factor": 1.5 }"#),
            Err(ConfigError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            AnalyzerConfig::from_json_str(
                r#"{ "scalar": { "kind": "decibel", "range_min": 0, "range_max": -10 } }"#
            ),
            Err(ConfigError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            AnalyzerConfig::from_json_str("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            AnalyzerConfig::load("/nonexistent/spectrum.json"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn hop_size_follows_fft_rate() {
        let mut config = AnalyzerConfig::default();
        assert_eq!(config.hop_size(48000), 1024);

        config.fft_rate = Some(60);
        assert_eq!(config.hop_size(48000), 800);

        // Never longer than a window
        config.fft_rate = Some(10);
        assert_eq!(config.hop_size(48000), 1024);
    }
}
