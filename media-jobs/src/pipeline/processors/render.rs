//! Subtitle burn-in processor.

use async_trait::async_trait;
use tracing::{debug, info};

use super::traits::{Processor, ProcessorContext};
use super::transcribe::transcribe_media;
use crate::engines::{EditPlan, RenderOptions};
use crate::job::{JobInput, JobKind, OutputArtifact};
use crate::pipeline::chunked::run_segments;
use crate::pipeline::segment::plan_segments;
use crate::subtitles::SubtitleFormat;
use crate::{Error, Result};

/// Transcribes the input, then burns the subtitles into the video window by
/// window and joins the rendered windows.
pub struct RenderSubtitlesProcessor;

#[async_trait]
impl Processor for RenderSubtitlesProcessor {
    fn kind(&self) -> JobKind {
        JobKind::RenderSubtitles
    }

    fn name(&self) -> &'static str {
        "RenderSubtitlesProcessor"
    }

    async fn process(
        &self,
        ctx: &ProcessorContext,
        input: &JobInput,
    ) -> Result<Vec<OutputArtifact>> {
        let JobInput::RenderSubtitles(params) = input else {
            return Err(Error::Other(format!("{} cannot process {}", self.name(), input.kind())));
        };

        ctx.prepare_dirs().await?;
        let media = ctx.fetch(&params.source, "input").await?;

        let mut transcript =
            transcribe_media(ctx, &media, &params.language, &ctx.progress.stage(0, 50)).await?;
        transcript.apply_timing_offset(params.timing_offset);

        let info = ctx.media.probe(&media).await?;
        if !info.has_video {
            return Err(Error::CollaboratorFatal(format!(
                "{} has no video stream to render subtitles onto",
                media.display()
            )));
        }
        let segments = plan_segments(0.0, info.duration_secs, f64::from(ctx.snapshot().chunk_secs));
        debug!(job_id = %ctx.job_id, segments = segments.len(), "Planned subtitle render");

        let transcript = &transcript;
        let media = media.as_path();
        let stage = ctx.progress.stage(50, 100);
        let rendered = run_segments(ctx, &segments, &stage, |segment, decision| async move {
            let window = segment.window;
            let local = transcript.slice(window.start, window.end);
            let output = ctx.workspace_file(format!("render_{:04}.mp4", segment.index));

            let plan = if local.cues.is_empty() {
                EditPlan::Cut
            } else {
                let subtitles = ctx.workspace_file(format!("subs_{:04}.srt", segment.index));
                tokio::fs::write(&subtitles, local.to_srt())
                    .await
                    .map_err(|e| Error::io_path("writing", &subtitles, e))?;
                EditPlan::BurnSubtitles {
                    subtitles,
                    style: params.style.clone(),
                }
            };

            ctx.media
                .render(media, window, &plan, &RenderOptions::from_decision(&decision), &output)
                .await?;
            if let EditPlan::BurnSubtitles { subtitles, .. } = &plan {
                let _ = tokio::fs::remove_file(subtitles).await;
            }
            Ok(output)
        })
        .await?;

        let video = ctx.output_file("output.mp4");
        ctx.media.concat(&rendered, &video).await?;
        for part in &rendered {
            let _ = tokio::fs::remove_file(part).await;
        }

        let mut outputs = vec![OutputArtifact::media(&video)];
        if params.return_subtitles_file {
            let srt = ctx.output_file(format!("subtitles.{}", SubtitleFormat::Srt.extension()));
            tokio::fs::write(&srt, transcript.to_srt())
                .await
                .map_err(|e| Error::io_path("writing", &srt, e))?;
            outputs.push(OutputArtifact::subtitles(srt));
        }

        info!(
            job_id = %ctx.job_id,
            segments = rendered.len(),
            path = %video.display(),
            "Subtitles rendered"
        );
        Ok(outputs)
    }
}
