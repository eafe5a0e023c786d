//! Sub-bin peak frequency estimation

use super::spectrum::bin_resolution;
use serde::{Deserialize, Serialize};

/// Strategy for refining a peak bin into a frequency.
///
/// `magnitudes` is a half spectrum, so the transform size is twice its length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakInterpolator {
    /// Neighbour ratio offset, at most one bin
    Linear,
    /// Vertex of a parabola fitted in the dB domain
    #[default]
    Parabolic,
}

impl PeakInterpolator {
    /// Estimated frequency in Hz of the peak at `peak_index`.
    pub fn calc_peak(&self, magnitudes: &[f32], peak_index: usize, rate: u32) -> f32 {
        if peak_index >= magnitudes.len() {
            return 0.0;
        }
        let resolution = bin_resolution(rate, magnitudes.len() * 2) as f32;
        match self {
            PeakInterpolator::Linear => linear(magnitudes, peak_index, resolution),
            PeakInterpolator::Parabolic => parabolic(magnitudes, peak_index, resolution),
        }
    }
}

fn neighbour(magnitudes: &[f32], index: isize) -> f32 {
    if index < 0 {
        return 0.0;
    }
    magnitudes.get(index as usize).copied().unwrap_or(0.0)
}

fn linear(magnitudes: &[f32], peak: usize, resolution: f32) -> f32 {
    let centre = peak as f32 * resolution;
    let peak_value = magnitudes[peak];
    if peak_value <= 0.0 {
        return centre;
    }

    let below = neighbour(magnitudes, peak as isize - 1) / peak_value;
    let above = neighbour(magnitudes, peak as isize + 1) / peak_value;
    let offset = (above - below).clamp(-1.0, 1.0);

    centre + offset * resolution
}

fn to_db(magnitude: f32) -> f32 {
    20.0 * magnitude.max(1e-12).log10()
}

fn parabolic(magnitudes: &[f32], peak: usize, resolution: f32) -> f32 {
    let p = peak as isize;
    let x1 = (p - 1) as f32 * resolution;
    let x2 = p as f32 * resolution;
    let x3 = (p + 1) as f32 * resolution;
    let y1 = to_db(neighbour(magnitudes, p - 1));
    let y2 = to_db(magnitudes[peak]);
    let y3 = to_db(neighbour(magnitudes, p + 1));

    let vertex = parabola_vertex((x1, y1), (x2, y2), (x3, y3));
    if vertex.is_finite() {
        vertex
    } else {
        0.0
    }
}

/// x coordinate of the vertex of the parabola through three points
fn parabola_vertex((x1, y1): (f32, f32), (x2, y2): (f32, f32), (x3, y3): (f32, f32)) -> f32 {
    let denominator = (x1 - x2) * (x1 - x3) * (x2 - x3);
    let a = (x3 * (y2 - y1) + x2 * (y1 - y3) + x1 * (y3 - y2)) / denominator;
    let b = (x3 * x3 * (y1 - y2) + x2 * x2 * (y3 - y1) + x1 * x1 * (y2 - y3)) / denominator;
    -b / (2.0 * a)
}
