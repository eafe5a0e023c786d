//! Signal processing primitives for the spectrum pipeline
//!
//! Everything in here is synchronous and allocation-free on the hot path once
//! constructed. The capture thread owns one instance of each stage; the
//! display side owns its own smoother, scalar and history buffers.

pub mod downsample;
pub mod interpolation;
pub mod max_tracker;
pub mod ring_buffer;
pub mod scaling;
pub mod smoothing;
pub mod spectrum;
pub mod window;

pub use downsample::{DownSampler, UniformDownSampler};
pub use interpolation::PeakInterpolator;
pub use max_tracker::MaxTracker;
pub use ring_buffer::RingBuffer;
pub use scaling::{
    AxisScale, DecibelScalar, DisplayScalar, ExaggeratedScalar, FftScalar, LinearScalar,
    ScalarConfig, SharedScalar,
};
pub use smoothing::{
    create_smoother, ExponentialFalloffSmoother, MagnitudeSmoother, MultiplicativeSmoother,
    SmootherKind,
};
pub use spectrum::{SpectrumFrame, SpectrumTransform};
pub use window::{WindowFunction, WindowKind};

use thiserror::Error;

/// Contract violations raised by the processing stages
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    #[error("Size mismatch: expected {expected}, received {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Index {index} is out of bounds 0 - {size}")]
    IndexOutOfRange { index: usize, size: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// RMS level of a block in dBFS. Silence maps to negative infinity.
pub fn level_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return f32::NEG_INFINITY;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    let rms = (sum / samples.len() as f32).sqrt();
    20.0 * rms.log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_of_full_scale_square_is_zero_db() {
        let block = [1.0f32, -1.0, 1.0, -1.0];
        assert!(level_db(&block).abs() < 1e-6);
    }

    #[test]
    fn level_of_silence_is_negative_infinity() {
        assert_eq!(level_db(&[0.0; 16]), f32::NEG_INFINITY);
        assert_eq!(level_db(&[]), f32::NEG_INFINITY);
    }

    #[test]
    fn half_amplitude_is_about_minus_six_db() {
        let block = [0.5f32; 32];
        assert!((level_db(&block) + 6.0206).abs() < 1e-3);
    }
}
