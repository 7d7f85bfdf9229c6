//! Concatenation processor.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info};

use super::traits::{Processor, ProcessorContext};
use crate::engines::{EditPlan, RenderOptions};
use crate::job::{JobInput, JobKind, OutputArtifact};
use crate::pipeline::chunked::run_segments;
use crate::pipeline::segment::{Segment, plan_segments};
use crate::{Error, Result};

/// Joins several inputs end to end.
///
/// Every input is normalized through the same encoder settings window by
/// window, so inputs with different codecs concatenate cleanly.
pub struct JoinProcessor;

#[async_trait]
impl Processor for JoinProcessor {
    fn kind(&self) -> JobKind {
        JobKind::Join
    }

    fn name(&self) -> &'static str {
        "JoinProcessor"
    }

    async fn process(
        &self,
        ctx: &ProcessorContext,
        input: &JobInput,
    ) -> Result<Vec<OutputArtifact>> {
        let JobInput::Join(params) = input else {
            return Err(Error::Other(format!("{} cannot process {}", self.name(), input.kind())));
        };

        ctx.prepare_dirs().await?;

        let mut files: Vec<PathBuf> = Vec::with_capacity(params.sources.len());
        for (i, source) in params.sources.iter().enumerate() {
            files.push(ctx.fetch(source, &format!("input_{i:02}")).await?);
        }

        // One flat, ordered segment list across all inputs; `owner[i]` is the
        // input that segment `i` belongs to.
        let chunk_secs = f64::from(ctx.snapshot().chunk_secs);
        let mut segments = Vec::new();
        let mut owner = Vec::new();
        for (source_index, file) in files.iter().enumerate() {
            let info = ctx.media.probe(file).await?;
            let planned = plan_segments(0.0, info.duration_secs, chunk_secs);
            if planned.is_empty() {
                return Err(Error::CollaboratorFatal(format!(
                    "{} has no measurable duration",
                    file.display()
                )));
            }
            for segment in planned {
                segments.push(Segment {
                    index: segments.len(),
                    window: segment.window,
                });
                owner.push(source_index);
            }
        }
        debug!(
            job_id = %ctx.job_id,
            inputs = files.len(),
            segments = segments.len(),
            "Planned join"
        );

        let files = &files;
        let owner = &owner;
        let parts = run_segments(ctx, &segments, &ctx.progress, |segment, decision| async move {
            let source = &files[owner[segment.index]];
            let output = ctx.workspace_file(format!("part_{:04}.mp4", segment.index));
            ctx.media
                .render(
                    source,
                    segment.window,
                    &EditPlan::Cut,
                    &RenderOptions::from_decision(&decision),
                    &output,
                )
                .await?;
            Ok(output)
        })
        .await?;

        let joined = ctx.output_file("joined.mp4");
        ctx.media.concat(&parts, &joined).await?;
        for part in &parts {
            let _ = tokio::fs::remove_file(part).await;
        }

        info!(
            job_id = %ctx.job_id,
            inputs = files.len(),
            path = %joined.display(),
            "Inputs joined"
        );
        Ok(vec![OutputArtifact::media(joined)])
    }
}
