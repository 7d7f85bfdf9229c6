//! Background music processor.

use async_trait::async_trait;
use tracing::{debug, info};

use super::traits::{Processor, ProcessorContext};
use crate::engines::{EditPlan, RenderOptions};
use crate::job::{JobInput, JobKind, OutputArtifact};
use crate::pipeline::chunked::run_segments;
use crate::pipeline::segment::plan_segments;
use crate::{Error, Result};

/// Lays a music track under a video.
pub struct MixAudioProcessor;

/// Position in the music track that lines up with `video_time`, or `None`
/// when the music has already ended.
fn music_offset(video_time: f64, music_duration: f64, loop_music: bool) -> Option<f64> {
    if music_duration <= 0.0 {
        return None;
    }
    if loop_music {
        Some(video_time % music_duration)
    } else if video_time < music_duration {
        Some(video_time)
    } else {
        None
    }
}

#[async_trait]
impl Processor for MixAudioProcessor {
    fn kind(&self) -> JobKind {
        JobKind::MixAudio
    }

    fn name(&self) -> &'static str {
        "MixAudioProcessor"
    }

    async fn process(
        &self,
        ctx: &ProcessorContext,
        input: &JobInput,
    ) -> Result<Vec<OutputArtifact>> {
        let JobInput::MixAudio(params) = input else {
            return Err(Error::Other(format!("{} cannot process {}", self.name(), input.kind())));
        };

        ctx.prepare_dirs().await?;
        let video = ctx.fetch(&params.video, "video").await?;
        let music = ctx.fetch(&params.music, "music").await?;

        let video_info = ctx.media.probe(&video).await?;
        let music_info = ctx.media.probe(&music).await?;
        if !music_info.has_audio {
            return Err(Error::CollaboratorFatal(format!(
                "{} has no audio stream to mix",
                music.display()
            )));
        }

        let chunk_secs = f64::from(ctx.snapshot().chunk_secs);
        let segments = plan_segments(0.0, video_info.duration_secs, chunk_secs);
        if segments.is_empty() {
            return Err(Error::CollaboratorFatal(format!(
                "{} has no measurable duration",
                video.display()
            )));
        }
        let last = segments.len() - 1;
        debug!(job_id = %ctx.job_id, segments = segments.len(), "Planned audio mix");

        let video = video.as_path();
        let music = music.as_path();
        let parts = run_segments(ctx, &segments, &ctx.progress, |segment, decision| async move {
            let window = segment.window;
            let offset = music_offset(window.start, music_info.duration_secs, params.loop_music);
            let plan = match offset {
                Some(offset) => EditPlan::MixAudio {
                    music: music.to_path_buf(),
                    music_offset: offset,
                    volume: params.volume,
                    fade_in: if segment.index == 0 { params.fade_in } else { 0.0 },
                    fade_out: if segment.index == last { params.fade_out } else { 0.0 },
                    loop_music: params.loop_music,
                    base_has_audio: video_info.has_audio,
                },
                None => EditPlan::Cut,
            };

            let output = ctx.workspace_file(format!("mix_{:04}.mp4", segment.index));
            ctx.media
                .render(video, window, &plan, &RenderOptions::from_decision(&decision), &output)
                .await?;
            Ok(output)
        })
        .await?;

        let mixed = ctx.output_file("mixed.mp4");
        ctx.media.concat(&parts, &mixed).await?;
        for part in &parts {
            let _ = tokio::fs::remove_file(part).await;
        }

        info!(job_id = %ctx.job_id, path = %mixed.display(), "Audio mixed");
        Ok(vec![OutputArtifact::media(mixed)])
    }
}
