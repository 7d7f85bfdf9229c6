//! Media render/mux engine contract.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::policy::ResourceDecision;
use crate::subtitles::SubtitleStyle;

/// Basic facts about a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration_secs: f64,
    pub has_video: bool,
    pub has_audio: bool,
}

/// Half-open time range `[start, end)` in seconds on the source timeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: f64,
    pub end: f64,
}

impl TimeWindow {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// What to do with a window of input media.
#[derive(Debug, Clone, PartialEq)]
pub enum EditPlan {
    /// Re-encode the window unchanged.
    Cut,
    /// Decode the window's audio to 16 kHz mono PCM WAV.
    ExtractAudio,
    /// Burn a subtitle file (window-local timing) into the video.
    BurnSubtitles {
        subtitles: PathBuf,
        style: SubtitleStyle,
    },
    /// Mix a music track under the window's audio.
    MixAudio {
        music: PathBuf,
        /// Position in the music track matching the window start.
        music_offset: f64,
        volume: f32,
        fade_in: f64,
        fade_out: f64,
        loop_music: bool,
        /// Whether the input has an audio stream to mix with.
        base_has_audio: bool,
    },
}

/// Encoder settings derived from the active resource decision.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub threads: usize,
    pub preset: &'static str,
}

impl RenderOptions {
    pub fn from_decision(decision: &ResourceDecision) -> Self {
        Self {
            threads: decision.threads_per_job.max(1),
            preset: decision.quality_tier.encoder_preset(),
        }
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            preset: "veryfast",
        }
    }
}

/// Media render/mux engine.
///
/// Implementations must be deterministic for identical inputs. Errors for
/// which [`crate::Error::is_recoverable`] holds may be retried.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn probe(&self, input: &Path) -> Result<MediaInfo>;

    /// Apply `plan` to `window` of `input`, writing `output`.
    async fn render(
        &self,
        input: &Path,
        window: TimeWindow,
        plan: &EditPlan,
        options: &RenderOptions,
        output: &Path,
    ) -> Result<()>;

    /// Concatenate rendered segments, in order, into `output`.
    async fn concat(&self, segments: &[PathBuf], output: &Path) -> Result<()>;
}
