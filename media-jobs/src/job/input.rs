//! Typed, validated job inputs.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{JobKind, TimeSpec};
use crate::subtitles::{SubtitleFormat, SubtitleStyle};
use crate::{Error, Result};

fn default_language() -> String {
    "en".to_string()
}

fn default_volume() -> f32 {
    0.5
}

/// Where a job reads its media from: a fetchable URL or the primary output
/// of an earlier completed job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_job_id: Option<String>,
    /// Local path of the referenced job's output, filled at submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_path: Option<PathBuf>,
}

impl MediaSource {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn job(source_job_id: impl Into<String>) -> Self {
        Self {
            source_job_id: Some(source_job_id.into()),
            ..Default::default()
        }
    }

    fn validate(&self, field: &str) -> Result<()> {
        match (&self.url, &self.source_job_id) {
            (Some(url), None) if !url.trim().is_empty() => Ok(()),
            (None, Some(id)) if !id.trim().is_empty() => Ok(()),
            (Some(_), Some(_)) => Err(Error::validation(format!(
                "{field}: exactly one of url or source_job_id must be given"
            ))),
            _ => Err(Error::validation(format!(
                "{field}: a non-empty url or source_job_id is required"
            ))),
        }
    }

    /// Human-readable origin for logs.
    pub fn describe(&self) -> String {
        match (&self.url, &self.source_job_id) {
            (Some(url), _) => url.clone(),
            (None, Some(id)) => format!("job:{id}"),
            (None, None) => "<none>".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranscribeInput {
    pub source: MediaSource,
    #[serde(default = "default_language")]
    pub language: String,
    /// Seconds added to every cue after merging. May be negative.
    #[serde(default)]
    pub timing_offset: f64,
    #[serde(default)]
    pub format: SubtitleFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenderSubtitlesInput {
    pub source: MediaSource,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub timing_offset: f64,
    #[serde(default)]
    pub style: SubtitleStyle,
    /// Also publish the subtitle file as an output artifact.
    #[serde(default)]
    pub return_subtitles_file: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitInput {
    pub source: MediaSource,
    pub start_time: TimeSpec,
    pub end_time: TimeSpec,
}

impl SplitInput {
    /// Validated `(start, end)` in seconds.
    pub fn range(&self) -> Result<(f64, f64)> {
        let start = self.start_time.to_seconds()?;
        let end = self.end_time.to_seconds()?;
        if start < 0.0 {
            return Err(Error::validation("start_time must not be negative"));
        }
        if start >= end {
            return Err(Error::validation(format!(
                "start_time ({start}s) must be before end_time ({end}s)"
            )));
        }
        Ok((start, end))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinInput {
    pub sources: Vec<MediaSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MixAudioInput {
    pub video: MediaSource,
    pub music: MediaSource,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub fade_in: f64,
    #[serde(default)]
    pub fade_out: f64,
    #[serde(default)]
    pub loop_music: bool,
}

/// Input of a job, one variant per [`JobKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params", rename_all = "kebab-case")]
pub enum JobInput {
    Transcribe(TranscribeInput),
    RenderSubtitles(RenderSubtitlesInput),
    Split(SplitInput),
    Join(JoinInput),
    MixAudio(MixAudioInput),
}

fn parse<T: DeserializeOwned>(kind: JobKind, params: serde_json::Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| Error::validation(format!("Invalid {kind} parameters: {e}")))
}

impl JobInput {
    /// Decode and validate the raw parameters of a submission.
    pub fn from_params(kind: JobKind, params: serde_json::Value) -> Result<Self> {
        let input = match kind {
            JobKind::Transcribe => JobInput::Transcribe(parse(kind, params)?),
            JobKind::RenderSubtitles => JobInput::RenderSubtitles(parse(kind, params)?),
            JobKind::Split => JobInput::Split(parse(kind, params)?),
            JobKind::Join => JobInput::Join(parse(kind, params)?),
            JobKind::MixAudio => JobInput::MixAudio(parse(kind, params)?),
        };
        input.validate()?;
        Ok(input)
    }

    pub fn kind(&self) -> JobKind {
        match self {
            JobInput::Transcribe(_) => JobKind::Transcribe,
            JobInput::RenderSubtitles(_) => JobKind::RenderSubtitles,
            JobInput::Split(_) => JobKind::Split,
            JobInput::Join(_) => JobKind::Join,
            JobInput::MixAudio(_) => JobKind::MixAudio,
        }
    }

    /// Check every field constraint. Source references are resolved separately.
    pub fn validate(&self) -> Result<()> {
        match self {
            JobInput::Transcribe(input) => {
                input.source.validate("source")?;
                validate_language(&input.language)?;
                validate_finite("timing_offset", input.timing_offset)
            }
            JobInput::RenderSubtitles(input) => {
                input.source.validate("source")?;
                validate_language(&input.language)?;
                validate_finite("timing_offset", input.timing_offset)?;
                input.style.validate()
            }
            JobInput::Split(input) => {
                input.source.validate("source")?;
                input.range().map(|_| ())
            }
            JobInput::Join(input) => {
                if input.sources.len() < 2 {
                    return Err(Error::validation(format!(
                        "join requires at least 2 sources, got {}",
                        input.sources.len()
                    )));
                }
                for (i, source) in input.sources.iter().enumerate() {
                    source.validate(&format!("sources[{i}]"))?;
                }
                Ok(())
            }
            JobInput::MixAudio(input) => {
                input.video.validate("video")?;
                input.music.validate("music")?;
                if !(0.0..=1.0).contains(&input.volume) {
                    return Err(Error::validation(format!(
                        "volume must be between 0.0 and 1.0, got {}",
                        input.volume
                    )));
                }
                for (field, value) in [("fade_in", input.fade_in), ("fade_out", input.fade_out)] {
                    validate_finite(field, value)?;
                    if value < 0.0 {
                        return Err(Error::validation(format!("{field} must not be negative")));
                    }
                }
                Ok(())
            }
        }
    }

    /// All media sources, in declaration order.
    pub fn sources(&self) -> Vec<&MediaSource> {
        match self {
            JobInput::Transcribe(i) => vec![&i.source],
            JobInput::RenderSubtitles(i) => vec![&i.source],
            JobInput::Split(i) => vec![&i.source],
            JobInput::Join(i) => i.sources.iter().collect(),
            JobInput::MixAudio(i) => vec![&i.video, &i.music],
        }
    }

    pub fn sources_mut(&mut self) -> Vec<&mut MediaSource> {
        match self {
            JobInput::Transcribe(i) => vec![&mut i.source],
            JobInput::RenderSubtitles(i) => vec![&mut i.source],
            JobInput::Split(i) => vec![&mut i.source],
            JobInput::Join(i) => i.sources.iter_mut().collect(),
            JobInput::MixAudio(i) => vec![&mut i.video, &mut i.music],
        }
    }
}

fn validate_language(language: &str) -> Result<()> {
    let ok = (2..=8).contains(&language.len())
        && language
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok || language == "auto" {
        Ok(())
    } else {
        Err(Error::validation(format!("Invalid language code: {language:?}")))
    }
}

fn validate_finite(field: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::validation(format!("{field} must be a finite number")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transcribe_defaults() {
        let input = JobInput::from_params(
            JobKind::Transcribe,
            json!({ "source": { "url": "https://example.com/a.mp4" } }),
        )
        .unwrap();
        let JobInput::Transcribe(input) = input else {
            panic!("wrong variant");
        };
        assert_eq!(input.language, "en");
        assert_eq!(input.format, SubtitleFormat::Srt);
        assert_eq!(input.timing_offset, 0.0);
    }

    #[test]
    fn test_missing_source_is_rejected() {
        let err = JobInput::from_params(JobKind::Transcribe, json!({ "language": "en" }))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_source_needs_exactly_one_origin() {
        let both = json!({ "source": { "url": "a", "source_job_id": "b" } });
        let neither = json!({ "source": {} });
        assert!(JobInput::from_params(JobKind::Transcribe, both).is_err());
        assert!(JobInput::from_params(JobKind::Transcribe, neither).is_err());
    }

    #[test]
    fn test_join_requires_two_sources() {
        let err = JobInput::from_params(JobKind::Join, json!({ "sources": [] })).unwrap_err();
        assert!(err.to_string().contains("at least 2"));

        let one = json!({ "sources": [{ "url": "a" }] });
        assert!(JobInput::from_params(JobKind::Join, one).is_err());

        let two = json!({ "sources": [{ "url": "a" }, { "source_job_id": "j1" }] });
        assert!(JobInput::from_params(JobKind::Join, two).is_ok());
    }

    #[test]
    fn test_split_range_checks() {
        let ok = json!({ "source": { "url": "a" }, "start_time": "00:00:10", "end_time": 20 });
        assert!(JobInput::from_params(JobKind::Split, ok).is_ok());

        let reversed = json!({ "source": { "url": "a" }, "start_time": 20, "end_time": 10 });
        assert!(JobInput::from_params(JobKind::Split, reversed).is_err());

        let negative = json!({ "source": { "url": "a" }, "start_time": -1, "end_time": 10 });
        assert!(JobInput::from_params(JobKind::Split, negative).is_err());
    }

    #[test]
    fn test_mix_audio_volume_bounds() {
        let base = |volume: f64| {
            json!({
                "video": { "url": "v" },
                "music": { "url": "m" },
                "volume": volume,
            })
        };
        assert!(JobInput::from_params(JobKind::MixAudio, base(0.3)).is_ok());
        assert!(JobInput::from_params(JobKind::MixAudio, base(1.5)).is_err());

        let fade = json!({ "video": { "url": "v" }, "music": { "url": "m" }, "fade_in": -2 });
        assert!(JobInput::from_params(JobKind::MixAudio, fade).is_err());
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let params = json!({ "source": { "url": "a" }, "colour": "red" });
        assert!(JobInput::from_params(JobKind::Transcribe, params).is_err());
    }

    #[test]
    fn test_sources_lists_every_origin() {
        let input = JobInput::from_params(
            JobKind::MixAudio,
            json!({ "video": { "url": "v" }, "music": { "source_job_id": "j" } }),
        )
        .unwrap();
        let origins: Vec<String> = input.sources().iter().map(|s| s.describe()).collect();
        assert_eq!(origins, vec!["v".to_string(), "job:j".to_string()]);
    }
}
