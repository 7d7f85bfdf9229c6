//! Job data model.

mod input;
mod time;

pub use input::{
    JobInput, JoinInput, MediaSource, MixAudioInput, RenderSubtitlesInput, SplitInput,
    TranscribeInput,
};
pub use time::{TimeSpec, parse_time_to_seconds};

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobError;
use crate::policy::ResourceDecision;

/// Kind of media work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Transcribe,
    RenderSubtitles,
    Split,
    Join,
    MixAudio,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::Transcribe,
        JobKind::RenderSubtitles,
        JobKind::Split,
        JobKind::Join,
        JobKind::MixAudio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Transcribe => "transcribe",
            JobKind::RenderSubtitles => "render-subtitles",
            JobKind::Split => "split",
            JobKind::Join => "join",
            JobKind::MixAudio => "mix-audio",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| crate::Error::validation(format!("Unknown job kind: {s}")))
    }
}

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job is waiting for admission.
    Pending,
    /// Job is currently being processed.
    Processing,
    /// Job completed successfully.
    Completed,
    /// Job failed.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a record may move from `self` to `next`.
    ///
    /// Staying in a non-terminal status is allowed (progress updates).
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Pending)
                | (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of an output artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactRole {
    /// Primary media output.
    Media,
    /// Subtitle file.
    Subtitles,
}

/// Reference to a file produced by a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputArtifact {
    pub role: ArtifactRole,
    pub path: PathBuf,
    /// Size recorded when the artifact was verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl OutputArtifact {
    pub fn media(path: impl Into<PathBuf>) -> Self {
        Self {
            role: ArtifactRole::Media,
            path: path.into(),
            size_bytes: None,
        }
    }

    pub fn subtitles(path: impl Into<PathBuf>) -> Self {
        Self {
            role: ArtifactRole::Subtitles,
            path: path.into(),
            size_bytes: None,
        }
    }
}

/// Durable status record of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Percentage, meaningful only while processing.
    pub progress: u8,
    /// Latest human-readable progress note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub input: JobInput,
    #[serde(default)]
    pub outputs: Vec<OutputArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    /// Resource decision in force when the job was admitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_snapshot: Option<ResourceDecision>,
}

impl JobRecord {
    /// Create a pending record for a validated input.
    pub fn new(input: JobInput) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: input.kind(),
            status: JobStatus::Pending,
            progress: 0,
            status_message: Some("Job created".to_string()),
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            input,
            outputs: Vec::new(),
            error: None,
            resource_snapshot: None,
        }
    }

    /// Primary media artifact, if any.
    pub fn primary_output(&self) -> Option<&OutputArtifact> {
        self.outputs
            .iter()
            .find(|o| o.role == ArtifactRole::Media)
            .or_else(|| self.outputs.first())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in JobKind::ALL {
            assert_eq!(kind.as_str().parse::<JobKind>().unwrap(), kind);
        }
        assert!("transcode".parse::<JobKind>().is_err());
    }

    #[test]
    fn test_kind_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&JobKind::RenderSubtitles).unwrap(),
            "\"render-subtitles\""
        );
    }

    #[test]
    fn test_primary_output_prefers_media() {
        let mut record = JobRecord::new(JobInput::Join(JoinInput {
            sources: vec![MediaSource::url("a"), MediaSource::url("b")],
        }));
        record.outputs = vec![
            OutputArtifact::subtitles("/out/a.srt"),
            OutputArtifact::media("/out/a.mp4"),
        ];
        assert_eq!(
            record.primary_output().unwrap().path,
            PathBuf::from("/out/a.mp4")
        );
    }
}
