//! Audio capture and analysis module

mod backend;
mod capture;
mod sources;
mod synthetic;

pub use backend::{CaptureBackend, CaptureStream, CpalBackend, FrameBlock, FrameSink};
pub use capture::{
    downmix, CaptureEngine, CaptureError, SampleObserver, SpectrumObserver, MASTER_CHANNEL,
};
pub use sources::{
    default_source, find_source, CaptureSource, SampleFormat, SourceType, SYSTEM_AUDIO_ID,
};
pub use synthetic::{ToneBackend, ToneConfig};
