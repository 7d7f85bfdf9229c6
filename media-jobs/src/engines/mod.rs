//! External collaborators: media rendering, transcription and transport.
//!
//! The pipeline only sees the traits; the command-line adapters are wired in
//! by the binary.

mod command;
pub mod fetch;
mod ffmpeg;
mod media;
mod transcription;
mod whisper;

pub use command::{CommandOutput, run_command};
pub use fetch::{FetchChain, FetchStrategy, HttpStrategy, LocalFileStrategy, verify_media_file};
pub use ffmpeg::FfmpegEngine;
pub use media::{EditPlan, MediaEngine, MediaInfo, RenderOptions, TimeWindow};
pub use transcription::TranscriptionEngine;
pub use whisper::WhisperCppEngine;

use std::sync::Arc;

/// The collaborators a running job talks to.
#[derive(Clone)]
pub struct EngineSet {
    pub fetcher: FetchChain,
    pub media: Arc<dyn MediaEngine>,
    pub transcriber: Arc<dyn TranscriptionEngine>,
}
