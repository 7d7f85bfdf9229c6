//! Speech-to-text engine contract.

use std::path::Path;

use async_trait::async_trait;

use crate::Result;
use crate::policy::QualityTier;
use crate::subtitles::Transcript;

/// Speech-to-text engine.
///
/// Timestamps in the returned transcript are relative to the start of
/// `audio`. A recoverable error (see [`crate::Error::is_recoverable`]) is
/// retried once by the pipeline; anything else fails the job.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    async fn transcribe(
        &self,
        audio: &Path,
        language: &str,
        tier: QualityTier,
        threads: usize,
    ) -> Result<Transcript>;
}
