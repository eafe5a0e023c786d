//! Capture engine state shared between the capture thread and callers

use serde::{Deserialize, Serialize};

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    #[default]
    Idle,
    Starting,
    Capturing,
    Stopping,
}

impl CaptureState {
    pub fn is_idle(self) -> bool {
        self == CaptureState::Idle
    }
}

/// Strongest bin of the latest window
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PeakReading {
    /// Interpolated frequency in Hz
    pub frequency: f32,

    /// Magnitude of the peak bin, 0 when the window was silent
    pub magnitude: f32,
}

/// Status snapshot for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub state: CaptureState,
    pub source_id: Option<String>,
    pub window_size: usize,
    pub peak: PeakReading,
    pub level_db: f32,
    /// Per-channel levels in dBFS, master first
    pub channel_levels: Vec<f32>,
    pub frames_analyzed: u64,
    pub error: Option<String>,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            state: CaptureState::Idle,
            source_id: None,
            window_size: 1024,
            peak: PeakReading::default(),
            level_db: f32::NEG_INFINITY,
            channel_levels: Vec::new(),
            frames_analyzed: 0,
            error: None,
        }
    }
}
