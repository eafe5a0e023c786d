//! Display-rate temporal smoothing of magnitude frames
//!
//! Smoothers keep one displayed value per bin. Fresh input only ever raises a
//! displayed value; decay happens in [`MagnitudeSmoother::apply_smoothing`],
//! which the display clock calls once per tick with the elapsed time. That
//! keeps the fall speed independent of how often audio windows complete.

use serde::{Deserialize, Serialize};

/// Per-bin smoothing state driven by a display clock
pub trait MagnitudeSmoother: Send {
    /// Reallocate for `bins` bins, discarding all state.
    fn resize(&mut self, bins: usize);

    /// Number of bins
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current displayed values
    fn data(&self) -> &[f32];

    /// Feed a raw frame of `len` values starting at `offset`, mapping each
    /// through `transform` first. Values past the smoother's size are ignored.
    fn set_data_with(
        &mut self,
        raw: &[f32],
        offset: usize,
        len: usize,
        transform: &dyn Fn(f32) -> f32,
    );

    /// Feed a raw frame as-is.
    fn set_data(&mut self, raw: &[f32]) {
        self.set_data_with(raw, 0, raw.len(), &|v| v);
    }

    /// Advance the decay by `delta_t` seconds.
    fn apply_smoothing(&mut self, delta_t: f64);

    fn factor(&self) -> f64;

    fn set_factor(&mut self, factor: f64);

    /// Clamp range for displayed values
    fn set_bounds(&mut self, min: f32, max: f32);
}

/// Selectable smoothing policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmootherKind {
    /// Peak hold with accelerating fall
    #[default]
    Falloff,
    /// Exponential approach toward the latest frame
    Multiplicative,
}

/// Build a smoother of `kind` sized for `bins` bins.
pub fn create_smoother(kind: SmootherKind, bins: usize, factor: f64) -> Box<dyn MagnitudeSmoother> {
    let mut smoother: Box<dyn MagnitudeSmoother> = match kind {
        SmootherKind::Falloff => Box::new(ExponentialFalloffSmoother::new(bins)),
        SmootherKind::Multiplicative => Box::new(MultiplicativeSmoother::new(bins)),
    };
    smoother.set_factor(factor);
    smoother
}

/// Longest tick that is honoured; longer gaps (window drags, stalls) are cut
const MAX_DELTA_T: f32 = 1.0;

/// Peak-hold smoother whose values fall with increasing speed.
///
/// A bin that gets a new maximum stops falling. Every tick it drops by its
/// current velocity, then the velocity grows by `30 * factor * dt`.
#[derive(Debug, Clone)]
pub struct ExponentialFalloffSmoother {
    displayed: Vec<f32>,
    velocity: Vec<f32>,
    factor: f64,
    bound_min: f32,
    bound_max: f32,
}

impl ExponentialFalloffSmoother {
    pub fn new(bins: usize) -> Self {
        Self {
            displayed: vec![0.0; bins],
            velocity: vec![0.0; bins],
            factor: 1.0,
            bound_min: 0.0,
            bound_max: 1.0,
        }
    }
}

impl MagnitudeSmoother for ExponentialFalloffSmoother {
    fn resize(&mut self, bins: usize) {
        self.displayed = vec![0.0; bins];
        self.velocity = vec![0.0; bins];
    }

    fn len(&self) -> usize {
        self.displayed.len()
    }

    fn data(&self) -> &[f32] {
        &self.displayed
    }

    fn set_data_with(
        &mut self,
        raw: &[f32],
        offset: usize,
        len: usize,
        transform: &dyn Fn(f32) -> f32,
    ) {
        let values = raw.iter().skip(offset).take(len);
        for ((shown, velocity), &value) in self
            .displayed
            .iter_mut()
            .zip(self.velocity.iter_mut())
            .zip(values)
        {
            let point = transform(value).clamp(self.bound_min, self.bound_max);
            if *shown < point {
                *shown = point;
                *velocity = 0.0;
            }
        }
    }

    fn apply_smoothing(&mut self, delta_t: f64) {
        let dt = (delta_t as f32).clamp(0.0, MAX_DELTA_T);
        let acceleration = self.factor as f32 * 30.0 * dt;

        for (shown, velocity) in self.displayed.iter_mut().zip(self.velocity.iter_mut()) {
            *shown = (*shown - *velocity * dt).clamp(self.bound_min, self.bound_max);
            *velocity += acceleration;
        }
    }

    fn factor(&self) -> f64 {
        self.factor
    }

    fn set_factor(&mut self, factor: f64) {
        self.factor = factor.max(0.0);
    }

    fn set_bounds(&mut self, min: f32, max: f32) {
        self.bound_min = min.min(max);
        self.bound_max = max.max(min);
    }
}

/// Smoother that moves displayed values toward the latest frame by a fixed
/// fraction per tick. Rising input is shown immediately.
#[derive(Debug, Clone)]
pub struct MultiplicativeSmoother {
    displayed: Vec<f32>,
    target: Vec<f32>,
    factor: f64,
    bound_min: f32,
    bound_max: f32,
}

impl MultiplicativeSmoother {
    pub fn new(bins: usize) -> Self {
        Self {
            displayed: vec![0.0; bins],
            target: vec![0.0; bins],
            factor: 0.91,
            bound_min: 0.0,
            bound_max: 1.0,
        }
    }
}

impl MagnitudeSmoother for MultiplicativeSmoother {
    fn resize(&mut self, bins: usize) {
        self.displayed = vec![0.0; bins];
        self.target = vec![0.0; bins];
    }

    fn len(&self) -> usize {
        self.displayed.len()
    }

    fn data(&self) -> &[f32] {
        &self.displayed
    }

    fn set_data_with(
        &mut self,
        raw: &[f32],
        offset: usize,
        len: usize,
        transform: &dyn Fn(f32) -> f32,
    ) {
        let values = raw.iter().skip(offset).take(len);
        for ((shown, target), &value) in self
            .displayed
            .iter_mut()
            .zip(self.target.iter_mut())
            .zip(values)
        {
            let point = transform(value).clamp(self.bound_min, self.bound_max);
            *target = point;
            if *shown < point {
                *shown = point;
            }
        }
    }

    fn apply_smoothing(&mut self, delta_t: f64) {
        let keep = self.factor.clamp(0.0, 1.0) as f32;
        let step = (1.0 - keep) * (delta_t as f32 * 100.0).clamp(0.0, 1.0);

        for (shown, &target) in self.displayed.iter_mut().zip(&self.target) {
            *shown = (*shown + (target - *shown) * step).clamp(self.bound_min, self.bound_max);
        }
    }

    fn factor(&self) -> f64 {
        self.factor
    }

    fn set_factor(&mut self, factor: f64) {
        self.factor = factor.clamp(0.0, 1.0);
    }

    fn set_bounds(&mut self, min: f32, max: f32) {
        self.bound_min = min.min(max);
        self.bound_max = max.max(min);
    }
}
