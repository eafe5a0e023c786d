//! Forward FFT to a magnitude spectrum, plus bin/frequency math

use super::DspError;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Smallest supported analysis window
pub const MIN_WINDOW_SIZE: usize = 256;

/// Largest supported analysis window
pub const MAX_WINDOW_SIZE: usize = 65536;

/// Check that `size` is a power of two inside the supported range.
pub fn validate_window_size(size: usize) -> Result<(), DspError> {
    if !size.is_power_of_two() || !(MIN_WINDOW_SIZE..=MAX_WINDOW_SIZE).contains(&size) {
        return Err(DspError::InvalidConfiguration(format!(
            "window size {size} must be a power of two between {MIN_WINDOW_SIZE} and {MAX_WINDOW_SIZE}"
        )));
    }
    Ok(())
}

/// Width of one bin in Hz
pub fn bin_resolution(rate: u32, fft_size: usize) -> f64 {
    rate as f64 / fft_size as f64
}

/// Bin containing `frequency`, clamped to `[0, fft_size]`
pub fn bin_of_frequency(rate: u32, fft_size: usize, frequency: f64) -> usize {
    let bin = (frequency / bin_resolution(rate, fft_size)).floor();
    if bin <= 0.0 {
        0
    } else {
        (bin as usize).min(fft_size)
    }
}

/// Centre frequency of `bin`, rounded to whole Hz
pub fn frequency_of_bin(bin: usize, rate: u32, fft_size: usize) -> u32 {
    (bin as f64 * bin_resolution(rate, fft_size)).round() as u32
}

/// Number of bins needed to cover frequencies up to `max_frequency`
pub fn trim_result_buffer_to(fft_size: usize, rate: u32, max_frequency: u32) -> usize {
    let bins = (max_frequency as f64 / bin_resolution(rate, fft_size)).ceil() as usize;
    bins.min(fft_size / 2)
}

/// Nyquist frequency
pub fn max_frequency_for_rate(rate: u32) -> u32 {
    rate / 2
}

/// Number of samples one period of `frequency` spans at `rate`
pub fn frequency_samples_at_rate(frequency: f64, rate: u32) -> f64 {
    rate as f64 / frequency
}

/// One analysed window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectrumFrame {
    /// One magnitude per bin, `window_size / 2` of them
    pub magnitudes: Vec<f32>,
    pub sample_rate: u32,
    pub window_size: usize,
}

impl SpectrumFrame {
    pub fn bin_count(&self) -> usize {
        self.magnitudes.len()
    }

    pub fn frequency_of(&self, bin: usize) -> u32 {
        frequency_of_bin(bin, self.sample_rate, self.window_size)
    }

    /// Bins up to `max_frequency`
    pub fn trimmed(&self, max_frequency: u32) -> &[f32] {
        let bins = trim_result_buffer_to(self.window_size, self.sample_rate, max_frequency);
        &self.magnitudes[..bins.min(self.magnitudes.len())]
    }

    /// Index of the largest magnitude
    pub fn peak_bin(&self) -> Option<usize> {
        peak_bin(&self.magnitudes)
    }
}

/// Index of the largest value, first one wins on ties
pub fn peak_bin(magnitudes: &[f32]) -> Option<usize> {
    magnitudes
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &m)| match best {
            Some((_, b)) if b >= m => best,
            _ => Some((i, m)),
        })
        .map(|(i, _)| i)
}

/// Real-input forward transform producing `size / 2` magnitudes
pub struct SpectrumTransform {
    size: usize,
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
}

impl SpectrumTransform {
    /// Plan a transform of `size` points. Any even size of at least 2 works;
    /// [`validate_window_size`] enforces the range the engine accepts.
    pub fn new(size: usize) -> Result<Self, DspError> {
        if size < 2 || size % 2 != 0 {
            return Err(DspError::InvalidConfiguration(format!(
                "transform size {size} must be even and at least 2"
            )));
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Ok(Self {
            size,
            fft,
            buffer: vec![Complex::new(0.0, 0.0); size],
            scratch,
            magnitudes: vec![0.0; size / 2],
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Transform a windowed block and return its magnitudes.
    ///
    /// The returned slice is reused by the next call.
    pub fn transform(&mut self, windowed: &[f32]) -> Result<&[f32], DspError> {
        if windowed.len() != self.size {
            return Err(DspError::SizeMismatch {
                expected: self.size,
                actual: windowed.len(),
            });
        }

        for (slot, &sample) in self.buffer.iter_mut().zip(windowed) {
            *slot = Complex::new(sample, 0.0);
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        // Real input: the upper half mirrors the lower half
        for (mag, c) in self.magnitudes.iter_mut().zip(&self.buffer) {
            *mag = (c.re * c.re + c.im * c.im).sqrt();
        }

        Ok(&self.magnitudes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::{WindowFunction, WindowKind};

    fn sine(frequency: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * frequency * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn window_sizes_are_validated() {
        assert!(validate_window_size(256).is_ok());
        assert!(validate_window_size(65536).is_ok());
        assert!(validate_window_size(128).is_err());
        assert!(validate_window_size(1000).is_err());
        assert!(validate_window_size(131072).is_err());
    }

    #[test]
    fn bin_and_frequency_round_trip_within_one_bin() {
        for &(rate, fft_size) in &[(48000u32, 1024usize), (44100, 4096), (96000, 256)] {
            for bin in 0..=fft_size / 2 {
                let freq = frequency_of_bin(bin, rate, fft_size);
                let back = bin_of_frequency(rate, fft_size, freq as f64);
                assert!(
                    back.abs_diff(bin) <= 1,
                    "rate {rate} size {fft_size}: bin {bin} -> {freq} Hz -> bin {back}"
                );
            }
        }
    }

    #[test]
    fn bin_of_frequency_clamps() {
        assert_eq!(bin_of_frequency(48000, 1024, -5.0), 0);
        assert_eq!(bin_of_frequency(48000, 1024, 1.0e9), 1024);
    }

    #[test]
    fn trim_and_nyquist() {
        assert_eq!(max_frequency_for_rate(48000), 24000);
        assert_eq!(trim_result_buffer_to(1024, 48000, 20000), 427);
        assert_eq!(trim_result_buffer_to(1024, 48000, 30000), 512);
        assert_eq!(frequency_samples_at_rate(100.0, 48000), 480.0);
    }

    #[test]
    fn mono_48k_window_1024_yields_512_bins() {
        let mut transform = SpectrumTransform::new(1024).unwrap();
        let block = sine(1000.0, 48000, 1024);
        let frame = SpectrumFrame {
            magnitudes: transform.transform(&block).unwrap().to_vec(),
            sample_rate: 48000,
            window_size: 1024,
        };

        assert_eq!(frame.bin_count(), 512);
        assert_eq!(frame.frequency_of(0), 0);
        let top = frame.frequency_of(511) as f64;
        assert!((top - 23977.0).abs() < bin_resolution(48000, 1024));
    }

    #[test]
    fn sinusoid_peaks_in_the_expected_bin() {
        let rate = 44100;
        let size = 4096;
        let mut transform = SpectrumTransform::new(size).unwrap();

        for &freq in &[440.0f32, 1234.5, 9000.0] {
            let mut block = sine(freq, rate, size);
            WindowFunction::new(WindowKind::BlackmanHarris, size)
                .apply(&mut block)
                .unwrap();
            let mags = transform.transform(&block).unwrap();

            let peak = peak_bin(mags).unwrap();
            let expected = bin_of_frequency(rate, size, freq as f64);
            assert!(peak.abs_diff(expected) <= 1, "{freq} Hz: peak {peak}, expected {expected}");
        }
    }

    #[test]
    fn magnitudes_are_non_negative_and_dc_lands_in_bin_zero() {
        let mut transform = SpectrumTransform::new(256).unwrap();
        let mags = transform.transform(&[0.5; 256]).unwrap();

        assert!(mags.iter().all(|&m| m >= 0.0));
        assert_eq!(peak_bin(mags), Some(0));
        assert!((mags[0] - 128.0).abs() < 1e-3);
    }

    #[test]
    fn transform_rejects_wrong_length() {
        let mut transform = SpectrumTransform::new(256).unwrap();
        assert!(matches!(
            transform.transform(&[0.0; 255]),
            Err(DspError::SizeMismatch { expected: 256, actual: 255 })
        ));
        assert!(SpectrumTransform::new(255).is_err());
    }

    #[test]
    fn trimmed_frame_stops_at_max_frequency() {
        let frame = SpectrumFrame {
            magnitudes: vec![1.0; 512],
            sample_rate: 48000,
            window_size: 1024,
        };
        assert_eq!(frame.trimmed(20000).len(), 427);
        assert_eq!(frame.trimmed(48000).len(), 512);
    }
}
