//! Mapping of raw magnitudes onto a `[0, 1]` display range
//!
//! Each scalar is a small value type with its own parameters. [`DisplayScalar`]
//! picks one at runtime from a [`ScalarConfig`], and [`SharedScalar`] lets a
//! settings thread swap parameters while the display thread is scaling.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Output axis described by a scalar, for drawing grid lines
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisScale {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

/// Raw magnitude to display value
pub trait FftScalar {
    type Params;

    /// Scaled value clamped to `[0, 1]`
    fn scale(&self, raw: f32) -> f32;

    /// Scaled value in the scalar's own unit, before normalisation
    fn scale_raw(&self, raw: f32) -> f32;

    fn update(&mut self, params: Self::Params);

    fn axis_scale(&self) -> AxisScale;
}

/// `sqrt(raw) * scaling`. Fed magnitudes, this compresses to `|X|^0.5`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearScalar {
    scaling: f32,
}

impl Default for LinearScalar {
    fn default() -> Self {
        Self { scaling: 1.0 }
    }
}

impl LinearScalar {
    pub fn new(scaling: f32) -> Self {
        Self { scaling }
    }
}

impl FftScalar for LinearScalar {
    type Params = f32;

    fn scale(&self, raw: f32) -> f32 {
        self.scale_raw(raw).clamp(0.0, 1.0)
    }

    fn scale_raw(&self, raw: f32) -> f32 {
        raw.max(0.0).sqrt() * self.scaling
    }

    fn update(&mut self, scaling: f32) {
        self.scaling = scaling;
    }

    fn axis_scale(&self) -> AxisScale {
        AxisScale {
            min: 0.0,
            max: 1.0,
            step: 0.1,
        }
    }
}

/// Power in dB, normalised over `[range_min, range_max]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecibelScalar {
    range_min: f32,
    range_max: f32,
}

impl Default for DecibelScalar {
    fn default() -> Self {
        Self {
            range_min: -90.0,
            range_max: 5.0,
        }
    }
}

impl DecibelScalar {
    pub fn new(range_min: f32, range_max: f32) -> Self {
        Self {
            range_min,
            range_max,
        }
    }
}

impl FftScalar for DecibelScalar {
    /// `(range_min, range_max)`
    type Params = (f32, f32);

    fn scale(&self, raw: f32) -> f32 {
        let span = self.range_max - self.range_min;
        if span <= 0.0 {
            return 0.0;
        }
        ((self.scale_raw(raw) - self.range_min) / span).clamp(0.0, 1.0)
    }

    fn scale_raw(&self, raw: f32) -> f32 {
        10.0 * (raw * raw).log10()
    }

    fn update(&mut self, (range_min, range_max): (f32, f32)) {
        self.range_min = range_min;
        self.range_max = range_max;
    }

    fn axis_scale(&self) -> AxisScale {
        AxisScale {
            min: self.range_min as f64,
            max: self.range_max as f64,
            step: 10.0,
        }
    }
}

/// Curve that lifts quiet content so low-level detail stays visible.
///
/// The curve rises to a maximum and bends back down for loud input, so it is
/// held flat from its maximum onward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExaggeratedScalar {
    scaling: f32,
    /// `sqrt(raw)` at which the curve peaks
    knee: f32,
}

impl Default for ExaggeratedScalar {
    fn default() -> Self {
        Self::new(20.0)
    }
}

impl ExaggeratedScalar {
    /// Negative scaling is treated as zero.
    pub fn new(scaling: f32) -> Self {
        let scaling = scaling.max(0.0);
        Self {
            scaling,
            knee: exaggerated_knee(scaling),
        }
    }

    fn curve(&self, s: f32) -> f32 {
        s * (self.scaling * (1.0 - (s + 0.2).ln() - 0.813) + 1.0)
    }
}

/// Slope of `s * (k * (1 - ln(s + 0.2) - 0.813) + 1)`
fn exaggerated_slope(k: f32, s: f32) -> f32 {
    k * (0.187 - (s + 0.2).ln() - s / (s + 0.2)) + 1.0
}

/// Where the exaggerated curve stops rising. The slope is strictly
/// decreasing for `k > 0`, so bisection finds the single root.
fn exaggerated_knee(k: f32) -> f32 {
    if k <= 0.0 {
        return f32::INFINITY;
    }
    let mut low = 0.0f32;
    let mut high = 1.0f32;
    while exaggerated_slope(k, high) > 0.0 {
        low = high;
        high *= 2.0;
        if !high.is_finite() {
            return f32::INFINITY;
        }
    }
    for _ in 0..48 {
        let mid = 0.5 * (low + high);
        if exaggerated_slope(k, mid) > 0.0 {
            low = mid;
        } else {
            high = mid;
        }
    }
    low
}

impl FftScalar for ExaggeratedScalar {
    type Params = f32;

    fn scale(&self, raw: f32) -> f32 {
        self.scale_raw(raw).clamp(0.0, 1.0)
    }

    fn scale_raw(&self, raw: f32) -> f32 {
        let s = raw.max(0.0).sqrt().min(self.knee);
        self.curve(s)
    }

    fn update(&mut self, scaling: f32) {
        *self = Self::new(scaling);
    }

    fn axis_scale(&self) -> AxisScale {
        AxisScale {
            min: 0.0,
            max: 1.0,
            step: 0.1,
        }
    }
}

/// Serializable scalar selection with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScalarConfig {
    Linear { scaling: f32 },
    Decibel { range_min: f32, range_max: f32 },
    Exaggerated { scaling: f32 },
}

impl Default for ScalarConfig {
    fn default() -> Self {
        ScalarConfig::Decibel {
            range_min: -90.0,
            range_max: 5.0,
        }
    }
}

/// Runtime-selected scalar
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DisplayScalar {
    Linear(LinearScalar),
    Decibel(DecibelScalar),
    Exaggerated(ExaggeratedScalar),
}

impl DisplayScalar {
    pub fn from_config(config: ScalarConfig) -> Self {
        match config {
            ScalarConfig::Linear { scaling } => DisplayScalar::Linear(LinearScalar::new(scaling)),
            ScalarConfig::Decibel {
                range_min,
                range_max,
            } => DisplayScalar::Decibel(DecibelScalar::new(range_min, range_max)),
            ScalarConfig::Exaggerated { scaling } => {
                DisplayScalar::Exaggerated(ExaggeratedScalar::new(scaling))
            }
        }
    }

    pub fn scale(&self, raw: f32) -> f32 {
        match self {
            DisplayScalar::Linear(s) => s.scale(raw),
            DisplayScalar::Decibel(s) => s.scale(raw),
            DisplayScalar::Exaggerated(s) => s.scale(raw),
        }
    }

    pub fn axis_scale(&self) -> AxisScale {
        match self {
            DisplayScalar::Linear(s) => s.axis_scale(),
            DisplayScalar::Decibel(s) => s.axis_scale(),
            DisplayScalar::Exaggerated(s) => s.axis_scale(),
        }
    }

    /// Scale every value of `raw` into `out`, replacing its contents.
    pub fn scale_into(&self, raw: &[f32], out: &mut Vec<f32>) {
        out.clear();
        out.extend(raw.iter().map(|&v| self.scale(v)));
    }
}

impl Default for DisplayScalar {
    fn default() -> Self {
        DisplayScalar::from_config(ScalarConfig::default())
    }
}

/// Scalar shared between a settings writer and the display reader
#[derive(Debug, Clone, Default)]
pub struct SharedScalar {
    inner: Arc<RwLock<DisplayScalar>>,
}

impl SharedScalar {
    pub fn new(config: ScalarConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(DisplayScalar::from_config(config))),
        }
    }

    /// Replace the scalar. Frames being scaled finish with the old one.
    pub fn update(&self, config: ScalarConfig) {
        *self.inner.write() = DisplayScalar::from_config(config);
    }

    pub fn current(&self) -> DisplayScalar {
        *self.inner.read()
    }

    /// Scale a whole frame under one read guard.
    pub fn scale_frame(&self, raw: &[f32], out: &mut Vec<f32>) {
        self.inner.read().scale_into(raw, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx(actual: f32, expected: f32, tolerance: f32) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {expected} +/- {tolerance}, got {actual}"
        );
    }

    #[test]
    fn linear_is_square_root_times_scaling() {
        let mut scalar = LinearScalar::default();
        assert_approx(scalar.scale(0.25), 0.5, 1e-6);

        scalar.update(4.0);
        assert_approx(scalar.scale_raw(0.25), 2.0, 1e-6);
        assert_eq!(scalar.scale(0.25), 1.0);
        assert_eq!(scalar.scale(-1.0), 0.0);
    }

    #[test]
    fn decibel_maps_range_onto_unit_interval() {
        let mut scalar = DecibelScalar::new(-100.0, 0.0);
        assert_approx(scalar.scale_raw(1.0), 0.0, 1e-5);
        assert_approx(scalar.scale(1.0), 1.0, 1e-6);
        assert_approx(scalar.scale(0.1), 0.8, 1e-5);
        assert_approx(scalar.scale(1e-3), 0.4, 1e-5);

        // Silence and values below the floor clamp to zero
        assert_eq!(scalar.scale(0.0), 0.0);
        assert_eq!(scalar.scale(1e-9), 0.0);

        scalar.update((-20.0, 0.0));
        assert_approx(scalar.scale(0.1), 0.0, 1e-5);
        assert_eq!(
            scalar.axis_scale(),
            AxisScale {
                min: -20.0,
                max: 0.0,
                step: 10.0
            }
        );
    }

    #[test]
    fn decibel_with_empty_range_is_zero() {
        let scalar = DecibelScalar::new(0.0, 0.0);
        assert_eq!(scalar.scale(1.0), 0.0);
    }

    #[test]
    fn exaggerated_boosts_quiet_values_and_saturates() {
        let scalar = ExaggeratedScalar::default();
        let linear = LinearScalar::default();

        assert!(scalar.scale(0.001) > linear.scale(0.001));
        assert_eq!(scalar.scale(0.0), 0.0);
        assert_eq!(scalar.scale(1.0), 1.0);
        for i in 0..=100 {
            let v = scalar.scale(i as f32 / 100.0);
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn exaggerated_never_falls_for_louder_input() {
        for scaling in [0.5, 5.0, 20.0, 60.0] {
            let scalar = ExaggeratedScalar::new(scaling);
            let mut previous = 0.0;
            for i in 0..=400 {
                let raw = i as f32 / 100.0;
                let v = scalar.scale(raw);
                assert!(v >= previous, "scaling {scaling}: {v} at {raw} after {previous}");
                previous = v;
            }
        }

        // A normalised full-scale square fundamental saturates
        let scalar = ExaggeratedScalar::default();
        assert_eq!(scalar.scale(4.0 / std::f32::consts::PI), 1.0);
        assert_eq!(scalar.scale(4.0), 1.0);
    }

    #[test]
    fn exaggerated_update_moves_the_knee() {
        let mut scalar = ExaggeratedScalar::new(20.0);
        scalar.update(2.0);
        assert_eq!(scalar, ExaggeratedScalar::new(2.0));
        assert!(scalar.scale_raw(9.0) >= scalar.scale_raw(1.0));
    }

    #[test]
    fn config_deserializes_tagged() {
        let config: ScalarConfig =
            serde_json::from_str(r#"{"kind":"decibel","range_min":-60,"range_max":0}"#).unwrap();
        assert_eq!(
            config,
            ScalarConfig::Decibel {
                range_min: -60.0,
                range_max: 0.0
            }
        );

        let config: ScalarConfig = serde_json::from_str(r#"{"kind":"linear","scaling":2}"#).unwrap();
        assert_eq!(
            DisplayScalar::from_config(config),
            DisplayScalar::Linear(LinearScalar::new(2.0))
        );
    }

    #[test]
    fn shared_scalar_update_is_seen_by_clones() {
        let shared = SharedScalar::new(ScalarConfig::Linear { scaling: 1.0 });
        let reader = shared.clone();
        let mut out = Vec::new();

        reader.scale_frame(&[0.25, 1.0], &mut out);
        assert_eq!(out, vec![0.5, 1.0]);

        shared.update(ScalarConfig::Linear { scaling: 0.5 });
        reader.scale_frame(&[0.25, 1.0], &mut out);
        assert_eq!(out, vec![0.25, 0.5]);
    }

    #[test]
    fn concurrent_updates_never_split_a_frame() {
        let shared = SharedScalar::new(ScalarConfig::Linear { scaling: 1.0 });
        let writer = shared.clone();

        let handle = std::thread::spawn(move || {
            for i in 0..500 {
                let scaling = if i % 2 == 0 { 0.5 } else { 1.0 };
                writer.update(ScalarConfig::Linear { scaling });
            }
        });

        let frame = vec![0.25f32; 64];
        let mut out = Vec::new();
        for _ in 0..500 {
            shared.scale_frame(&frame, &mut out);
            assert!(out.iter().all(|&v| v == out[0]));
        }
        handle.join().unwrap();
    }
}
