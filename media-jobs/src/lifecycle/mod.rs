//! Job lifecycle manager.
//!
//! The only writer of job records. Owns submission (validation and source
//! resolution), state transitions, progress, output registration, partial
//! artifact cleanup, cancellation and startup recovery.

mod events;
mod queue;

pub use events::JobEvent;
pub use queue::PendingQueue;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{JobError, JobErrorKind};
use crate::job::{JobInput, JobKind, JobRecord, JobStatus, OutputArtifact};
use crate::policy::ResourceDecision;
use crate::store::JobRepository;
use crate::{Error, Result};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Counts reported by [`JobLifecycleManager::recover`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub requeued: usize,
    pub interrupted: usize,
}

pub struct JobLifecycleManager {
    repo: Arc<dyn JobRepository>,
    queue: PendingQueue,
    events: broadcast::Sender<JobEvent>,
    cancellations: DashMap<String, CancellationToken>,
    /// Per-job scratch space for segments and intermediates.
    workspace_root: PathBuf,
    /// Per-job directories holding published artifacts.
    output_root: PathBuf,
}

impl JobLifecycleManager {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        workspace_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            repo,
            queue: PendingQueue::new(),
            events,
            cancellations: DashMap::new(),
            workspace_root: workspace_root.into(),
            output_root: output_root.into(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repo
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Scratch directory of a job.
    pub fn workspace(&self, id: &str) -> PathBuf {
        self.workspace_root.join(id)
    }

    /// Directory where a job publishes its artifacts.
    pub fn output_dir(&self, id: &str) -> PathBuf {
        self.output_root.join(id)
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Validate raw parameters for `kind` and submit the job.
    pub async fn submit(&self, kind: JobKind, params: serde_json::Value) -> Result<String> {
        let input = JobInput::from_params(kind, params)?;
        self.submit_input(input).await
    }

    /// Submit an already-typed input. Returns the id of the new pending job.
    ///
    /// Nothing is persisted when validation or source resolution fails.
    pub async fn submit_input(&self, mut input: JobInput) -> Result<String> {
        input.validate()?;
        self.resolve_sources(&mut input).await?;

        let record = self.repo.create_job(input).await?;
        info!(job_id = %record.id, kind = %record.kind, "Job submitted");

        self.queue.push(record.id.clone());
        self.emit(JobEvent::Submitted {
            job_id: record.id.clone(),
            kind: record.kind,
        });
        Ok(record.id)
    }

    /// Resolve every `source_job_id` to the referenced job's primary output.
    async fn resolve_sources(&self, input: &mut JobInput) -> Result<()> {
        for source in input.sources_mut() {
            // Only the resolver may set a local path.
            source.resolved_path = None;

            let Some(source_id) = source.source_job_id.clone() else {
                continue;
            };
            let referenced = match self.repo.get_job(&source_id).await {
                Ok(job) => job,
                Err(Error::NotFound { .. }) => {
                    return Err(Error::validation(format!(
                        "Source job {source_id} does not exist"
                    )));
                }
                Err(e) => return Err(e),
            };
            if referenced.status != JobStatus::Completed {
                return Err(Error::validation(format!(
                    "Source job {source_id} is {}, not completed",
                    referenced.status
                )));
            }
            let output = referenced.primary_output().ok_or_else(|| {
                Error::validation(format!("Source job {source_id} has no outputs"))
            })?;
            debug!(
                source_job_id = %source_id,
                path = %output.path.display(),
                "Resolved chained source"
            );
            source.resolved_path = Some(output.path.clone());
        }
        Ok(())
    }

    /// Move a pending job to processing with the decision it was admitted under.
    ///
    /// Returns the committed record and the job's cancellation token.
    pub async fn admit(
        &self,
        id: &str,
        snapshot: ResourceDecision,
    ) -> Result<(JobRecord, CancellationToken)> {
        let token = self.cancellation_token(id);
        let recorded = snapshot.clone();
        let record = self
            .repo
            .update_job(
                id,
                Box::new(move |r| {
                    if r.status != JobStatus::Pending {
                        return Err(Error::InvalidStateTransition {
                            from: r.status.to_string(),
                            to: JobStatus::Processing.to_string(),
                        });
                    }
                    r.status = JobStatus::Processing;
                    r.status_message = Some("Processing started".to_string());
                    r.resource_snapshot = Some(recorded);
                    Ok(())
                }),
            )
            .await?;

        info!(
            job_id = %id,
            tier = %snapshot.quality_tier,
            chunk_secs = snapshot.chunk_secs,
            parallel = snapshot.parallel_chunks,
            "Job admitted"
        );
        self.emit(JobEvent::Started {
            job_id: id.to_string(),
            snapshot,
        });
        Ok((record, token))
    }

    /// Advance progress. Values below the recorded progress are clamped.
    pub async fn report_progress(
        &self,
        id: &str,
        percent: u8,
        note: Option<String>,
    ) -> Result<JobRecord> {
        let message = note.clone();
        let record = self
            .repo
            .update_job(
                id,
                Box::new(move |r| {
                    if r.status != JobStatus::Processing {
                        return Err(Error::InvalidStateTransition {
                            from: r.status.to_string(),
                            to: JobStatus::Processing.to_string(),
                        });
                    }
                    r.progress = percent.min(100).max(r.progress);
                    if message.is_some() {
                        r.status_message = message;
                    }
                    Ok(())
                }),
            )
            .await?;

        debug!(job_id = %id, progress = record.progress, "Progress reported");
        self.emit(JobEvent::Progress {
            job_id: id.to_string(),
            percent: record.progress,
            note,
        });
        Ok(record)
    }

    /// Terminal success. Artifacts are verified by the store; a failed
    /// verification leaves the job failed.
    pub async fn complete(&self, id: &str, outputs: Vec<OutputArtifact>) -> Result<JobRecord> {
        let record = self
            .repo
            .update_job(
                id,
                Box::new(move |r| {
                    r.status = JobStatus::Completed;
                    r.status_message = Some("Completed".to_string());
                    r.outputs = outputs;
                    Ok(())
                }),
            )
            .await?;

        self.cancellations.remove(id);
        self.remove_workspace(id).await;

        match (&record.status, &record.error) {
            (JobStatus::Failed, Some(error)) => {
                warn!(job_id = %id, error = %error.message, "Job failed verification");
                self.remove_output_dir(id).await;
                self.emit(JobEvent::Failed {
                    job_id: id.to_string(),
                    error: error.clone(),
                });
            }
            _ => {
                info!(job_id = %id, outputs = record.outputs.len(), "Job completed");
                self.emit(JobEvent::Completed {
                    job_id: id.to_string(),
                });
            }
        }
        Ok(record)
    }

    /// Terminal failure. Partial artifacts are removed; cleanup problems are
    /// logged only.
    pub async fn fail(&self, id: &str, error: JobError) -> Result<JobRecord> {
        let detail = error.clone();
        let record = self
            .repo
            .update_job(
                id,
                Box::new(move |r| {
                    r.status = JobStatus::Failed;
                    r.status_message = Some(format!("Failed: {}", detail.message));
                    r.error = Some(detail);
                    Ok(())
                }),
            )
            .await?;

        self.cancellations.remove(id);
        self.remove_workspace(id).await;
        self.remove_output_dir(id).await;

        warn!(job_id = %id, kind = %error.kind, error = %error.message, "Job failed");
        self.emit(JobEvent::Failed {
            job_id: id.to_string(),
            error,
        });
        Ok(record)
    }

    pub async fn status(&self, id: &str) -> Result<JobRecord> {
        self.repo.get_job(id).await
    }

    /// Artifacts of a completed job.
    pub async fn outputs(&self, id: &str) -> Result<Vec<OutputArtifact>> {
        let record = self.repo.get_job(id).await?;
        if record.status != JobStatus::Completed {
            return Err(Error::NotReady {
                id: record.id,
                status: record.status.to_string(),
            });
        }
        Ok(record.outputs)
    }

    /// Recent records, newest first.
    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<JobRecord>> {
        let mut jobs = self.repo.list_jobs().await?;
        if let Some(limit) = limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    /// Request cancellation.
    ///
    /// A processing job stops at its next segment boundary. A pending job is
    /// failed as soon as the scheduler next runs.
    pub async fn cancel(&self, id: &str) -> Result<JobRecord> {
        let record = self.repo.get_job(id).await?;
        if record.status.is_terminal() {
            return Err(Error::InvalidStateTransition {
                from: record.status.to_string(),
                to: "cancelled".to_string(),
            });
        }
        self.cancellation_token(id).cancel();
        info!(job_id = %id, status = %record.status, "Cancellation requested");
        Ok(record)
    }

    pub fn is_cancelled(&self, id: &str) -> bool {
        self.cancellations
            .get(id)
            .is_some_and(|t| t.is_cancelled())
    }

    fn cancellation_token(&self, id: &str) -> CancellationToken {
        self.cancellations
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    /// Remove pending jobs that were cancelled before admission.
    pub fn take_cancelled_pending(&self) -> Vec<String> {
        self.queue.drain_where(|id| self.is_cancelled(id))
    }

    /// Delete a job that is not processing, with its files.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let record = self.repo.get_job(id).await?;
        if record.status == JobStatus::Processing {
            return Err(Error::InvalidStateTransition {
                from: record.status.to_string(),
                to: "deleted".to_string(),
            });
        }
        self.queue.remove(id);
        self.repo.delete_job(id).await?;
        self.cancellations.remove(id);
        self.remove_workspace(id).await;
        self.remove_output_dir(id).await;
        info!(job_id = %id, "Job deleted");
        Ok(())
    }

    /// Rebuild in-memory state after a restart.
    ///
    /// Pending jobs are queued again in submission order; jobs that were
    /// processing when the process stopped are failed as interrupted.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut jobs = self.repo.list_jobs().await?;
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let mut report = RecoveryReport::default();
        for job in jobs {
            match job.status {
                JobStatus::Pending => {
                    self.queue.push(job.id);
                    report.requeued += 1;
                }
                JobStatus::Processing => {
                    let error = JobError::new(
                        JobErrorKind::Interrupted,
                        "Processing was interrupted by a restart",
                    );
                    match self.fail(&job.id, error).await {
                        Ok(_) => report.interrupted += 1,
                        Err(e) => {
                            warn!(job_id = %job.id, error = %e, "Failed to mark job interrupted")
                        }
                    }
                }
                JobStatus::Completed | JobStatus::Failed => {}
            }
        }

        if report.requeued > 0 || report.interrupted > 0 {
            info!(
                requeued = report.requeued,
                interrupted = report.interrupted,
                "Recovered persisted jobs"
            );
        }
        Ok(report)
    }

    pub async fn remove_workspace(&self, id: &str) {
        remove_dir_logged(&self.workspace(id), "workspace").await;
    }

    async fn remove_output_dir(&self, id: &str) {
        remove_dir_logged(&self.output_dir(id), "output directory").await;
    }
}

async fn remove_dir_logged(dir: &Path, what: &str) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(path = %dir.display(), "Removed job {what}"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %dir.display(), error = %e, "Failed to remove job {what}"),
    }
}
