//! Clip extraction processor.

use async_trait::async_trait;
use tracing::{debug, info};

use super::traits::{Processor, ProcessorContext};
use crate::engines::{EditPlan, RenderOptions};
use crate::job::{JobInput, JobKind, OutputArtifact};
use crate::pipeline::chunked::run_segments;
use crate::pipeline::segment::plan_segments;
use crate::{Error, Result};

/// Cuts `[start_time, end_time)` out of the input.
pub struct SplitProcessor;

#[async_trait]
impl Processor for SplitProcessor {
    fn kind(&self) -> JobKind {
        JobKind::Split
    }

    fn name(&self) -> &'static str {
        "SplitProcessor"
    }

    async fn process(
        &self,
        ctx: &ProcessorContext,
        input: &JobInput,
    ) -> Result<Vec<OutputArtifact>> {
        let JobInput::Split(params) = input else {
            return Err(Error::Other(format!("{} cannot process {}", self.name(), input.kind())));
        };
        let (start, requested_end) = params.range()?;

        ctx.prepare_dirs().await?;
        let media = ctx.fetch(&params.source, "input").await?;
        let info = ctx.media.probe(&media).await?;

        if start >= info.duration_secs {
            return Err(Error::validation(format!(
                "start_time {start}s is beyond the input duration {:.3}s",
                info.duration_secs
            )));
        }
        let end = requested_end.min(info.duration_secs);

        let segments = plan_segments(start, end, f64::from(ctx.snapshot().chunk_secs));
        debug!(job_id = %ctx.job_id, start, end, segments = segments.len(), "Planned split");

        let media = media.as_path();
        let parts = run_segments(ctx, &segments, &ctx.progress, |segment, decision| async move {
            let output = ctx.workspace_file(format!("clip_{:04}.mp4", segment.index));
            ctx.media
                .render(
                    media,
                    segment.window,
                    &EditPlan::Cut,
                    &RenderOptions::from_decision(&decision),
                    &output,
                )
                .await?;
            Ok(output)
        })
        .await?;

        let clip = ctx.output_file("clip.mp4");
        ctx.media.concat(&parts, &clip).await?;
        for part in &parts {
            let _ = tokio::fs::remove_file(part).await;
        }

        info!(job_id = %ctx.job_id, start, end, path = %clip.display(), "Clip extracted");
        Ok(vec![OutputArtifact::media(clip)])
    }
}
