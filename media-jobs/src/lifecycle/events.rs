use serde::Serialize;

use crate::error::JobError;
use crate::job::JobKind;
use crate::policy::ResourceDecision;

/// Job state change notification.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Submitted {
        job_id: String,
        kind: JobKind,
    },
    Started {
        job_id: String,
        snapshot: ResourceDecision,
    },
    Progress {
        job_id: String,
        percent: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    Completed {
        job_id: String,
    },
    Failed {
        job_id: String,
        error: JobError,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Submitted { job_id, .. }
            | JobEvent::Started { job_id, .. }
            | JobEvent::Progress { job_id, .. }
            | JobEvent::Completed { job_id }
            | JobEvent::Failed { job_id, .. } => job_id,
        }
    }
}
