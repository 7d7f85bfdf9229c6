//! Durable job record store.
//!
//! Every mutation goes through [`JobRepository::update_job`], which applies a
//! mutator as one read-modify-write. The shared rules in [`apply_update`] keep
//! records consistent regardless of the backing implementation:
//!
//! - status only moves forward (pending -> processing -> completed | failed)
//! - progress resets to 0 on entering processing and never decreases
//! - outputs are present only when completed, error only when failed
//! - a completion whose artifacts are missing or empty becomes a failure

mod file;

pub use file::FileJobRepository;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use crate::error::{JobError, JobErrorKind};
use crate::job::{JobInput, JobRecord, JobStatus};
use crate::{Error, Result};

/// Mutation applied to a record inside an atomic update.
pub type JobMutator = Box<dyn FnOnce(&mut JobRecord) -> Result<()> + Send>;

/// Job record repository.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Persist a new pending record for `input`.
    async fn create_job(&self, input: JobInput) -> Result<JobRecord>;
    async fn get_job(&self, id: &str) -> Result<JobRecord>;
    /// Atomically apply `mutate` to the record and return the committed state.
    async fn update_job(&self, id: &str, mutate: JobMutator) -> Result<JobRecord>;
    async fn delete_job(&self, id: &str) -> Result<()>;
    /// All records, newest first.
    async fn list_jobs(&self) -> Result<Vec<JobRecord>>;

    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>> {
        Ok(self
            .list_jobs()
            .await?
            .into_iter()
            .filter(|j| j.status == status)
            .collect())
    }
}

/// Run `mutate` against a copy of `current` and normalize the result.
pub(crate) fn apply_update(current: &JobRecord, mutate: JobMutator) -> Result<JobRecord> {
    let mut next = current.clone();
    mutate(&mut next)?;

    // Identity is immutable.
    next.id.clone_from(&current.id);
    next.kind = current.kind;
    next.created_at = current.created_at;
    next.input.clone_from(&current.input);

    if !current.status.can_transition_to(next.status) {
        return Err(Error::InvalidStateTransition {
            from: current.status.to_string(),
            to: next.status.to_string(),
        });
    }

    let now = Utc::now();
    match next.status {
        JobStatus::Pending => {
            next.progress = 0;
            next.outputs.clear();
            next.error = None;
        }
        JobStatus::Processing => {
            if current.status == JobStatus::Pending {
                next.progress = 0;
                next.started_at = Some(now);
            } else {
                next.progress = next.progress.min(100).max(current.progress);
            }
            next.outputs.clear();
            next.error = None;
        }
        JobStatus::Completed => {
            next.progress = 100;
            next.error = None;
            next.finished_at = Some(now);
        }
        JobStatus::Failed => {
            next.outputs.clear();
            if next.error.is_none() {
                next.error = Some(JobError::new(JobErrorKind::Internal, "Job failed"));
            }
            next.finished_at = Some(now);
        }
    }
    next.updated_at = now;
    Ok(next)
}

/// Confirm every declared artifact exists and is non-empty.
///
/// On failure the record is redirected to `failed` with a verification error.
pub(crate) async fn verify_outputs(record: &mut JobRecord) {
    let problem = if record.outputs.is_empty() {
        Some("no output artifacts were declared".to_string())
    } else {
        let mut problem = None;
        for output in &mut record.outputs {
            match tokio::fs::metadata(&output.path).await {
                Ok(meta) if meta.is_file() && meta.len() > 0 => {
                    output.size_bytes = Some(meta.len());
                }
                Ok(_) => {
                    problem = Some(format!("{} is empty", output.path.display()));
                    break;
                }
                Err(e) => {
                    problem = Some(format!("{} is not readable: {e}", output.path.display()));
                    break;
                }
            }
        }
        problem
    };

    if let Some(problem) = problem {
        warn!(job_id = %record.id, %problem, "Output verification failed");
        record.status = JobStatus::Failed;
        record.outputs.clear();
        record.error = Some(Error::Verification(problem).to_job_error());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JoinInput, MediaSource, OutputArtifact};

    fn record() -> JobRecord {
        JobRecord::new(JobInput::Join(JoinInput {
            sources: vec![MediaSource::url("a"), MediaSource::url("b")],
        }))
    }

    fn set_status(status: JobStatus) -> JobMutator {
        Box::new(move |r| {
            r.status = status;
            Ok(())
        })
    }

    #[test]
    fn test_entering_processing_resets_progress() {
        let mut current = record();
        current.progress = 40;
        let next = apply_update(
            &current,
            Box::new(|r| {
                r.status = JobStatus::Processing;
                r.progress = 70;
                Ok(())
            }),
        )
        .unwrap();
        assert_eq!(next.progress, 0);
        assert!(next.started_at.is_some());
    }

    #[test]
    fn test_progress_never_regresses() {
        let mut current = record();
        current.status = JobStatus::Processing;
        current.progress = 50;
        let next = apply_update(
            &current,
            Box::new(|r| {
                r.progress = 20;
                Ok(())
            }),
        )
        .unwrap();
        assert_eq!(next.progress, 50);

        let next = apply_update(
            &current,
            Box::new(|r| {
                r.progress = 250;
                Ok(())
            }),
        )
        .unwrap();
        assert_eq!(next.progress, 100);
    }

    #[test]
    fn test_backward_and_skipping_transitions_rejected() {
        let current = record();
        assert!(matches!(
            apply_update(&current, set_status(JobStatus::Completed)),
            Err(Error::InvalidStateTransition { .. })
        ));

        let mut done = record();
        done.status = JobStatus::Completed;
        assert!(apply_update(&done, set_status(JobStatus::Processing)).is_err());
        assert!(apply_update(&done, set_status(JobStatus::Completed)).is_err());
    }

    #[test]
    fn test_failure_always_carries_error_and_no_outputs() {
        let mut current = record();
        current.status = JobStatus::Processing;
        let next = apply_update(
            &current,
            Box::new(|r| {
                r.status = JobStatus::Failed;
                r.outputs.push(OutputArtifact::media("/tmp/x"));
                Ok(())
            }),
        )
        .unwrap();
        assert!(next.outputs.is_empty());
        assert!(next.error.is_some());
    }

    #[test]
    fn test_identity_is_immutable() {
        let current = record();
        let next = apply_update(
            &current,
            Box::new(|r| {
                r.id = "other".into();
                Ok(())
            }),
        )
        .unwrap();
        assert_eq!(next.id, current.id);
    }

    #[tokio::test]
    async fn test_verification_redirects_missing_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = record();
        r.status = JobStatus::Completed;
        r.outputs = vec![OutputArtifact::media(dir.path().join("missing.mp4"))];
        verify_outputs(&mut r).await;
        assert_eq!(r.status, JobStatus::Failed);
        assert_eq!(r.error.unwrap().kind, JobErrorKind::Verification);
    }

    #[tokio::test]
    async fn test_verification_rejects_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mp4");
        std::fs::write(&path, b"").unwrap();
        let mut r = record();
        r.status = JobStatus::Completed;
        r.outputs = vec![OutputArtifact::media(&path)];
        verify_outputs(&mut r).await;
        assert_eq!(r.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_verification_records_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        std::fs::write(&path, b"data").unwrap();
        let mut r = record();
        r.status = JobStatus::Completed;
        r.outputs = vec![OutputArtifact::media(&path)];
        verify_outputs(&mut r).await;
        assert_eq!(r.status, JobStatus::Completed);
        assert_eq!(r.outputs[0].size_bytes, Some(4));
    }
}
