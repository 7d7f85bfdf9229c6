//! Application-wide error types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing submission input. Never produces a job record.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Admission deferred because resources are exhausted. Not terminal.
    #[error("Resources exhausted: {0}")]
    ResourceExhaustion(String),

    /// A segment failed after its retry.
    #[error("Segment {index} failed: {message}")]
    SegmentProcessing { index: usize, message: String },

    /// Declared output artifact missing or empty at completion time.
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Pipeline wall-clock ceiling exceeded.
    #[error("Job timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// External engine signalled an unrecoverable condition.
    #[error("Collaborator fatal error: {0}")]
    CollaboratorFatal(String),

    /// External engine failed in a way that may succeed on retry.
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Job {id} is not completed (status: {status})")]
    NotReady { id: String, status: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether a collaborator call that produced this error may be retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Collaborator(_) | Self::Io(_) | Self::IoPath { .. })
    }

    /// Map a terminal error to the detail persisted on the job record.
    pub fn to_job_error(&self) -> JobError {
        let kind = match self {
            Self::SegmentProcessing { .. } => JobErrorKind::SegmentProcessing,
            Self::Verification(_) => JobErrorKind::Verification,
            Self::Timeout(_) => JobErrorKind::Timeout,
            Self::CollaboratorFatal(_) => JobErrorKind::CollaboratorFatal,
            Self::Cancelled => JobErrorKind::Cancelled,
            Self::Transport(_) => JobErrorKind::Transport,
            Self::Validation(_) => JobErrorKind::Validation,
            _ => JobErrorKind::Internal,
        };
        let segment_index = match self {
            Self::SegmentProcessing { index, .. } => Some(*index),
            _ => None,
        };
        JobError {
            kind,
            message: self.to_string(),
            segment_index,
        }
    }
}

/// Kind of terminal failure recorded on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    SegmentProcessing,
    Verification,
    Timeout,
    CollaboratorFatal,
    Cancelled,
    Transport,
    Validation,
    /// The process stopped while the job was processing.
    Interrupted,
    Internal,
}

impl std::fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobErrorKind::SegmentProcessing => "segment_processing",
            JobErrorKind::Verification => "verification",
            JobErrorKind::Timeout => "timeout",
            JobErrorKind::CollaboratorFatal => "collaborator_fatal",
            JobErrorKind::Cancelled => "cancelled",
            JobErrorKind::Transport => "transport",
            JobErrorKind::Validation => "validation",
            JobErrorKind::Interrupted => "interrupted",
            JobErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Structured failure detail stored on a failed job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_index: Option<usize>,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            segment_index: None,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind == JobErrorKind::Cancelled
    }
}
