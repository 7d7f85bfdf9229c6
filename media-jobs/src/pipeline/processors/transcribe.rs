//! Transcription processor.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};

use super::traits::{Processor, ProcessorContext};
use crate::engines::{EditPlan, RenderOptions};
use crate::job::{JobInput, JobKind, OutputArtifact};
use crate::pipeline::chunked::run_segments;
use crate::pipeline::progress::ProgressReporter;
use crate::pipeline::segment::plan_segments;
use crate::subtitles::Transcript;
use crate::{Error, Result};

/// Transcribe a local media file segment by segment and merge the result on
/// the source timeline.
///
/// Each segment's audio is extracted to its own WAV file, transcribed, and
/// deleted before the segment is reported done.
pub(crate) async fn transcribe_media(
    ctx: &ProcessorContext,
    input: &Path,
    language: &str,
    progress: &ProgressReporter,
) -> Result<Transcript> {
    let info = ctx.media.probe(input).await?;
    if !info.has_audio {
        return Err(Error::CollaboratorFatal(format!(
            "{} has no audio stream to transcribe",
            input.display()
        )));
    }

    let segments = plan_segments(0.0, info.duration_secs, f64::from(ctx.snapshot().chunk_secs));
    if segments.is_empty() {
        return Err(Error::CollaboratorFatal(format!(
            "{} has no measurable duration",
            input.display()
        )));
    }
    debug!(
        job_id = %ctx.job_id,
        segments = segments.len(),
        duration = info.duration_secs,
        "Planned transcription"
    );

    let parts = run_segments(ctx, &segments, progress, |segment, decision| async move {
        let wav = ctx.workspace_file(format!("audio_{:04}.wav", segment.index));
        ctx.media
            .render(
                input,
                segment.window,
                &EditPlan::ExtractAudio,
                &RenderOptions::from_decision(&decision),
                &wav,
            )
            .await?;

        let result = ctx
            .transcriber
            .transcribe(&wav, language, decision.quality_tier, decision.threads_per_job)
            .await;
        let _ = tokio::fs::remove_file(&wav).await;

        let mut part = result?;
        part.shift(segment.window.start);
        Ok(part)
    })
    .await?;

    let mut merged = Transcript::default();
    for part in parts {
        merged.extend(part);
    }
    Ok(merged)
}

/// Produces a subtitle file for the whole input.
pub struct TranscribeProcessor;

#[async_trait]
impl Processor for TranscribeProcessor {
    fn kind(&self) -> JobKind {
        JobKind::Transcribe
    }

    fn name(&self) -> &'static str {
        "TranscribeProcessor"
    }

    async fn process(
        &self,
        ctx: &ProcessorContext,
        input: &JobInput,
    ) -> Result<Vec<OutputArtifact>> {
        let JobInput::Transcribe(params) = input else {
            return Err(Error::Other(format!("{} cannot process {}", self.name(), input.kind())));
        };

        ctx.prepare_dirs().await?;
        let media = ctx.fetch(&params.source, "input").await?;

        let mut transcript = transcribe_media(ctx, &media, &params.language, &ctx.progress).await?;
        transcript.apply_timing_offset(params.timing_offset);

        let output = ctx.output_file(format!("subtitles.{}", params.format.extension()));
        let body = transcript.render(params.format)?;
        tokio::fs::write(&output, body)
            .await
            .map_err(|e| Error::io_path("writing", &output, e))?;

        info!(
            job_id = %ctx.job_id,
            cues = transcript.cues.len(),
            path = %output.display(),
            "Transcription written"
        );
        Ok(vec![OutputArtifact::subtitles(output)])
    }
}
