//! Element-wise running maximum over equally sized frames

use super::DspError;

/// Keeps the largest value seen per bin until [`zero`](MaxTracker::zero)
#[derive(Debug, Clone, Default)]
pub struct MaxTracker {
    data: Vec<f32>,
}

impl MaxTracker {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0.0; size],
        }
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reallocate for `size` bins, all zero.
    pub fn resize(&mut self, size: usize) {
        self.data = vec![0.0; size];
    }

    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    /// Fold a whole frame into the maxima.
    pub fn apply(&mut self, frame: &[f32]) -> Result<(), DspError> {
        self.apply_data(frame, 0, frame.len())
    }

    /// Fold `frame[offset..offset + limit]` into the maxima. `limit` must equal
    /// the tracker size.
    pub fn apply_data(&mut self, frame: &[f32], offset: usize, limit: usize) -> Result<(), DspError> {
        if limit != self.data.len() {
            return Err(DspError::SizeMismatch {
                expected: self.data.len(),
                actual: limit,
            });
        }
        let Some(window) = frame.get(offset..offset + limit) else {
            return Err(DspError::SizeMismatch {
                expected: offset + limit,
                actual: frame.len(),
            });
        };

        for (max, &value) in self.data.iter_mut().zip(window) {
            *max = max.max(value);
        }
        Ok(())
    }
}
