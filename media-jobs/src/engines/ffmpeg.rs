//! ffmpeg/ffprobe backed media engine.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::command::run_command;
use super::media::{EditPlan, MediaEngine, MediaInfo, RenderOptions, TimeWindow};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

pub struct FfmpegEngine {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegEngine {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// ffmpeg filter option escaping; values are wrapped in single quotes.
    fn escape_filter_value(value: &str) -> String {
        value
            .replace('\\', "\\\\")
            .replace(':', "\\:")
            .replace('\'', "\\'")
    }

    fn concat_list_entry(path: &Path) -> String {
        let path = path.to_string_lossy().replace('\'', "'\\''");
        format!("file '{path}'\n")
    }

    fn video_encoder_args(options: &RenderOptions) -> Vec<String> {
        vec![
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            options.preset.into(),
            "-crf".into(),
            "23".into(),
            "-threads".into(),
            options.threads.to_string(),
        ]
    }

    fn render_args(
        input: &Path,
        window: TimeWindow,
        plan: &EditPlan,
        options: &RenderOptions,
        output: &Path,
    ) -> Result<Vec<String>> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-nostdin".into(), "-y".into()];
        args.extend([
            "-ss".into(),
            format!("{:.3}", window.start),
            "-t".into(),
            format!("{:.3}", window.duration()),
            "-i".into(),
            input.to_string_lossy().into_owned(),
        ]);

        match plan {
            EditPlan::Cut => {
                args.extend(Self::video_encoder_args(options));
                args.extend(["-c:a".into(), "aac".into()]);
            }
            EditPlan::ExtractAudio => {
                args.extend([
                    "-vn".into(),
                    "-ac".into(),
                    "1".into(),
                    "-ar".into(),
                    "16000".into(),
                    "-c:a".into(),
                    "pcm_s16le".into(),
                ]);
            }
            EditPlan::BurnSubtitles { subtitles, style } => {
                let filter = format!(
                    "subtitles=filename='{}':force_style='{}'",
                    Self::escape_filter_value(&subtitles.to_string_lossy()),
                    Self::escape_filter_value(&style.force_style()?)
                );
                args.extend(["-vf".into(), filter]);
                args.extend(Self::video_encoder_args(options));
                args.extend(["-c:a".into(), "aac".into()]);
            }
            EditPlan::MixAudio {
                music,
                music_offset,
                volume,
                fade_in,
                fade_out,
                loop_music,
                base_has_audio,
            } => {
                if *loop_music {
                    args.extend(["-stream_loop".into(), "-1".into()]);
                }
                args.extend([
                    "-ss".into(),
                    format!("{music_offset:.3}"),
                    "-i".into(),
                    music.to_string_lossy().into_owned(),
                ]);

                let mut music_chain = format!("[1:a]volume={volume:.3}");
                if *fade_in > 0.0 {
                    music_chain.push_str(&format!(",afade=t=in:st=0:d={fade_in:.3}"));
                }
                if *fade_out > 0.0 {
                    let start = (window.duration() - fade_out).max(0.0);
                    music_chain.push_str(&format!(",afade=t=out:st={start:.3}:d={fade_out:.3}"));
                }
                let filter = if *base_has_audio {
                    format!(
                        "{music_chain}[m];[0:a][m]amix=inputs=2:duration=first:\
                         dropout_transition=0[a]"
                    )
                } else {
                    format!("{music_chain},apad[a]")
                };

                args.extend([
                    "-filter_complex".into(),
                    filter,
                    "-map".into(),
                    "0:v?".into(),
                    "-map".into(),
                    "[a]".into(),
                    "-t".into(),
                    format!("{:.3}", window.duration()),
                ]);
                args.extend(Self::video_encoder_args(options));
                args.extend(["-c:a".into(), "aac".into()]);
            }
        }

        args.push(output.to_string_lossy().into_owned());
        Ok(args)
    }
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    async fn probe(&self, input: &Path) -> Result<MediaInfo> {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.args([
            "-v",
            "error",
            "-show_entries",
            "format=duration:stream=codec_type",
            "-of",
            "json",
        ])
        .arg(input);
        let out = run_command(&mut cmd).await?.ensure_success(&self.ffprobe)?;

        let parsed: ProbeOutput = serde_json::from_str(&out.stdout)
            .map_err(|e| Error::CollaboratorFatal(format!("Unreadable ffprobe output: {e}")))?;

        let duration_secs = parsed
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.trim().parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0)
            .ok_or_else(|| {
                Error::CollaboratorFatal(format!(
                    "Could not determine duration of {}",
                    input.display()
                ))
            })?;

        let has = |kind: &str| {
            parsed
                .streams
                .iter()
                .any(|s| s.codec_type.as_deref() == Some(kind))
        };

        Ok(MediaInfo {
            duration_secs,
            has_video: has("video"),
            has_audio: has("audio"),
        })
    }

    async fn render(
        &self,
        input: &Path,
        window: TimeWindow,
        plan: &EditPlan,
        options: &RenderOptions,
        output: &Path,
    ) -> Result<()> {
        let args = Self::render_args(input, window, plan, options, output)?;
        debug!(ffmpeg = %self.ffmpeg, ?args, "Rendering segment");

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(&args);
        let out = run_command(&mut cmd).await?.ensure_success(&self.ffmpeg)?;
        debug!(output = %output.display(), duration = out.duration, "Segment rendered");
        Ok(())
    }

    async fn concat(&self, segments: &[PathBuf], output: &Path) -> Result<()> {
        match segments {
            [] => Err(Error::Other("Nothing to concatenate".to_string())),
            [only] => {
                tokio::fs::copy(only, output)
                    .await
                    .map_err(|e| Error::io_path("copying", only, e))?;
                Ok(())
            }
            _ => {
                let list_path = output.with_extension("concat.txt");
                let list: String = segments.iter().map(|p| Self::concat_list_entry(p)).collect();
                tokio::fs::write(&list_path, list)
                    .await
                    .map_err(|e| Error::io_path("writing", &list_path, e))?;

                let mut cmd = Command::new(&self.ffmpeg);
                cmd.args(["-hide_banner", "-nostdin", "-y", "-f", "concat", "-safe", "0", "-i"])
                    .arg(&list_path)
                    .args(["-c", "copy"])
                    .arg(output);
                let result = run_command(&mut cmd)
                    .await
                    .and_then(|out| out.ensure_success(&self.ffmpeg));

                if let Err(e) = tokio::fs::remove_file(&list_path).await {
                    debug!(path = %list_path.display(), error = %e, "Failed to remove concat list");
                }
                result.map(|_| ())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subtitles::SubtitleStyle;

    fn window() -> TimeWindow {
        TimeWindow::new(30.0, 60.0)
    }

    #[test]
    fn test_cut_args_seek_and_duration() {
        let args = FfmpegEngine::render_args(
            Path::new("/in.mp4"),
            window(),
            &EditPlan::Cut,
            &RenderOptions::default(),
            Path::new("/out.mp4"),
        )
        .unwrap();
        let joined = args.join(" ");
        assert!(joined.contains("-ss 30.000 -t 30.000 -i /in.mp4"));
        assert!(joined.contains("-preset veryfast"));
        assert_eq!(args.last().unwrap(), "/out.mp4");
    }

    #[test]
    fn test_extract_audio_args() {
        let args = FfmpegEngine::render_args(
            Path::new("/in.mp4"),
            window(),
            &EditPlan::ExtractAudio,
            &RenderOptions::default(),
            Path::new("/a.wav"),
        )
        .unwrap()
        .join(" ");
        assert!(args.contains("-vn -ac 1 -ar 16000 -c:a pcm_s16le"));
    }

    #[test]
    fn test_burn_filter_escapes_path() {
        let plan = EditPlan::BurnSubtitles {
            subtitles: PathBuf::from("C:\\subs\\it's.srt"),
            style: SubtitleStyle::default(),
        };
        let args = FfmpegEngine::render_args(
            Path::new("/in.mp4"),
            window(),
            &plan,
            &RenderOptions::default(),
            Path::new("/o.mp4"),
        )
        .unwrap();
        let filter = &args[args.iter().position(|a| a == "-vf").unwrap() + 1];
        assert!(filter.starts_with("subtitles=filename='C\\:\\\\subs\\\\it\\'s.srt'"));
        assert!(filter.contains("force_style='FontSize=24"));
    }

    #[test]
    fn test_mix_filter_with_fades() {
        let plan = EditPlan::MixAudio {
            music: PathBuf::from("/m.mp3"),
            music_offset: 30.0,
            volume: 0.5,
            fade_in: 2.0,
            fade_out: 3.0,
            loop_music: true,
            base_has_audio: true,
        };
        let args = FfmpegEngine::render_args(
            Path::new("/in.mp4"),
            window(),
            &plan,
            &RenderOptions::default(),
            Path::new("/o.mp4"),
        )
        .unwrap();
        let joined = args.join(" ");
        assert!(joined.contains("-stream_loop -1 -ss 30.000 -i /m.mp3"));
        let filter = &args[args.iter().position(|a| a == "-filter_complex").unwrap() + 1];
        assert!(filter.contains("afade=t=in:st=0:d=2.000"));
        assert!(filter.contains("afade=t=out:st=27.000:d=3.000"));
        assert!(filter.contains("amix=inputs=2"));
    }

    #[test]
    fn test_concat_entry_quotes() {
        assert_eq!(
            FfmpegEngine::concat_list_entry(Path::new("/a/b'c.mp4")),
            "file '/a/b'\\''c.mp4'\n"
        );
    }

    #[tokio::test]
    async fn test_concat_single_segment_copies() {
        let dir = tempfile::tempdir().unwrap();
        let seg = dir.path().join("s0.mp4");
        std::fs::write(&seg, b"seg").unwrap();
        let out = dir.path().join("out.mp4");
        let engine = FfmpegEngine::new("ffmpeg", "ffprobe");
        engine.concat(&[seg], &out).await.unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"seg");
    }
}
