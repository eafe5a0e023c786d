//! Decimation of long sequences down to a display width

/// Reduces a sequence to at most `target` elements
pub trait DownSampler<T> {
    fn down_sample(&self, samples: &[T], target: usize) -> Vec<T>;
}

/// Picks elements at a uniform fractional stride
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformDownSampler;

impl<T: Copy> DownSampler<T> for UniformDownSampler {
    fn down_sample(&self, samples: &[T], target: usize) -> Vec<T> {
        if samples.len() <= target {
            return samples.to_vec();
        }

        let stride = samples.len() as f64 / target as f64;
        let last = samples.len() - 1;
        (0..target)
            .map(|i| samples[((i as f64 * stride) as usize).min(last)])
            .collect()
    }
}
