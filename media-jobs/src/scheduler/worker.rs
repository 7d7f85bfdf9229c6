//! Execution of one admitted job.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::Error;
use crate::error::{JobError, JobErrorKind};
use crate::job::JobRecord;
use crate::lifecycle::JobLifecycleManager;
use crate::pipeline::{Processor, ProcessorContext};

/// Holds one worker slot; releasing it wakes the admission loop.
pub(super) struct SlotGuard {
    active: Arc<AtomicUsize>,
    freed: Arc<Notify>,
}

impl SlotGuard {
    pub(super) fn acquire(active: Arc<AtomicUsize>, freed: Arc<Notify>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self { active, freed }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.freed.notify_one();
    }
}

/// Runs an admitted job to a terminal state.
pub(super) struct JobWorker {
    pub lifecycle: Arc<JobLifecycleManager>,
    pub processor: Option<Arc<dyn Processor>>,
    pub ctx: ProcessorContext,
    pub timeout: Duration,
    pub slot: SlotGuard,
}

impl JobWorker {
    pub(super) async fn run(self, record: JobRecord) {
        let Self {
            lifecycle,
            processor,
            ctx,
            timeout,
            slot,
        } = self;
        let job_id = record.id.clone();

        let Some(processor) = processor else {
            error!(job_id = %job_id, kind = %record.kind, "No processor registered for job kind");
            let detail = JobError::new(
                JobErrorKind::Internal,
                format!("No processor registered for {}", record.kind),
            );
            if let Err(e) = lifecycle.fail(&job_id, detail).await {
                warn!(job_id = %job_id, error = %e, "Failed to record job failure");
            }
            drop(slot);
            return;
        };

        debug!(job_id = %job_id, processor = processor.name(), "Worker started");
        let result = tokio::time::timeout(timeout, processor.process(&ctx, &record.input)).await;

        let outcome = match result {
            Ok(Ok(outputs)) => lifecycle.complete(&job_id, outputs).await.map(|_| ()),
            Ok(Err(e)) => {
                if matches!(e, Error::Cancelled) {
                    info!(job_id = %job_id, "Job cancelled");
                }
                lifecycle.fail(&job_id, e.to_job_error()).await.map(|_| ())
            }
            Err(_) => {
                warn!(job_id = %job_id, timeout_secs = timeout.as_secs(), "Job timed out");
                lifecycle
                    .fail(&job_id, Error::Timeout(timeout).to_job_error())
                    .await
                    .map(|_| ())
            }
        };
        if let Err(e) = outcome {
            error!(job_id = %job_id, error = %e, "Failed to record job outcome");
        }

        drop(slot);
    }
}
