//! Window functions applied to a sample block before the transform

use super::DspError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, OnceLock};

/// Available tapers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    #[default]
    Hamming,
    Hann,
    BlackmanHarris,
}

type FactorCache = RwLock<HashMap<(WindowKind, usize), Arc<[f32]>>>;

/// Process-wide coefficient tables, published once per (kind, size)
static FACTOR_CACHE: OnceLock<FactorCache> = OnceLock::new();

/// Compute the coefficients for `kind` at `size`.
pub fn coefficients(kind: WindowKind, size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    let denom = (size - 1) as f64;

    (0..size)
        .map(|i| {
            let x = 2.0 * PI * i as f64 / denom;
            let w = match kind {
                WindowKind::Hamming => 0.54 - 0.46 * x.cos(),
                WindowKind::Hann => 0.5 * (1.0 - x.cos()),
                WindowKind::BlackmanHarris => {
                    const A0: f64 = 0.35875;
                    const A1: f64 = 0.48829;
                    const A2: f64 = 0.14128;
                    const A3: f64 = 0.01168;
                    A0 - A1 * x.cos() + A2 * (2.0 * x).cos() - A3 * (3.0 * x).cos()
                }
            };
            w as f32
        })
        .collect()
}

/// Shared coefficient table for `(kind, size)`, computed on first use.
fn cached_coefficients(kind: WindowKind, size: usize) -> Arc<[f32]> {
    let cache = FACTOR_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    if let Some(factors) = cache.read().get(&(kind, size)) {
        return factors.clone();
    }

    let mut tables = cache.write();
    tables
        .entry((kind, size))
        .or_insert_with(|| Arc::from(coefficients(kind, size)))
        .clone()
}

/// A window of fixed size backed by a cached coefficient table
#[derive(Debug, Clone)]
pub struct WindowFunction {
    kind: WindowKind,
    factors: Arc<[f32]>,
    sum: f32,
}

impl WindowFunction {
    pub fn new(kind: WindowKind, size: usize) -> Self {
        let factors = cached_coefficients(kind, size);
        let sum = factors.iter().sum();
        Self { kind, factors, sum }
    }

    pub fn kind(&self) -> WindowKind {
        self.kind
    }

    pub fn size(&self) -> usize {
        self.factors.len()
    }

    /// Coefficient table
    pub fn factors(&self) -> &[f32] {
        &self.factors
    }

    /// Sum of all coefficients (coherent gain times size)
    pub fn sum(&self) -> f32 {
        self.sum
    }

    /// Multiply `block` by the window in place.
    pub fn apply(&self, block: &mut [f32]) -> Result<(), DspError> {
        if block.len() != self.factors.len() {
            return Err(DspError::SizeMismatch {
                expected: self.factors.len(),
                actual: block.len(),
            });
        }
        for (sample, factor) in block.iter_mut().zip(self.factors.iter()) {
            *sample *= factor;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_all_approx(actual: &[f32], expected: &[f32], tolerance: f32) {
        assert_eq!(actual.len(), expected.len());
        for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
            assert!(
                (a - e).abs() <= tolerance,
                "index {i}: expected {e} +/- {tolerance}, got {a}"
            );
        }
    }

    #[test]
    fn hamming_window_of_ten() {
        let expected = [
            0.08, 0.1876, 0.4601, 0.77, 0.9723, 0.9723, 0.77, 0.4601, 0.1876, 0.08,
        ];
        assert_all_approx(&coefficients(WindowKind::Hamming, 10), &expected, 1e-4);
    }

    #[test]
    fn hann_window_of_ten() {
        let expected = [
            0.0, 0.117, 0.4132, 0.75, 0.9698, 0.9698, 0.75, 0.4132, 0.117, 0.0,
        ];
        assert_all_approx(&coefficients(WindowKind::Hann, 10), &expected, 1e-4);
    }

    #[test]
    fn blackman_harris_window_of_ten() {
        let expected = [
            0.0001, 0.0151, 0.147, 0.5206, 0.9317, 0.9317, 0.5206, 0.147, 0.0151, 0.0001,
        ];
        assert_all_approx(
            &coefficients(WindowKind::BlackmanHarris, 10),
            &expected,
            1e-4,
        );
    }

    #[test]
    fn instances_share_the_cached_table() {
        let a = WindowFunction::new(WindowKind::Hann, 512);
        let b = WindowFunction::new(WindowKind::Hann, 512);
        let c = WindowFunction::new(WindowKind::Hamming, 512);

        assert!(Arc::ptr_eq(&a.factors, &b.factors));
        assert!(!Arc::ptr_eq(&a.factors, &c.factors));
    }

    #[test]
    fn apply_multiplies_in_place() {
        let window = WindowFunction::new(WindowKind::Hann, 10);
        let mut block = vec![2.0f32; 10];
        window.apply(&mut block).unwrap();

        assert_eq!(block[0], 0.0);
        assert!((block[3] - 1.5).abs() < 1e-4);
    }

    #[test]
    fn apply_rejects_wrong_length() {
        let window = WindowFunction::new(WindowKind::Hamming, 16);
        let mut block = vec![1.0f32; 15];

        assert_eq!(
            window.apply(&mut block),
            Err(DspError::SizeMismatch {
                expected: 16,
                actual: 15
            })
        );
        assert!(block.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn cache_is_readable_from_many_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| WindowFunction::new(WindowKind::BlackmanHarris, 2048)))
            .collect();
        let windows: Vec<WindowFunction> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for w in &windows[1..] {
            assert!(Arc::ptr_eq(&windows[0].factors, &w.factors));
        }
    }
}
