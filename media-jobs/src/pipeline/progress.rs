use std::sync::Arc;

use tracing::debug;

use crate::lifecycle::JobLifecycleManager;

/// Reports fractional progress of one job through the lifecycle manager.
///
/// A reporter covers a band of the overall percentage so multi-phase jobs can
/// give each phase its own share.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: String,
    lifecycle: Arc<JobLifecycleManager>,
    lo: u8,
    hi: u8,
}

impl ProgressReporter {
    pub fn new(job_id: impl Into<String>, lifecycle: Arc<JobLifecycleManager>) -> Self {
        Self {
            job_id: job_id.into(),
            lifecycle,
            lo: 0,
            hi: 100,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Reporter for the sub-band `[lo, hi]` of this reporter's band, in
    /// percent of this band.
    pub fn stage(&self, lo: u8, hi: u8) -> Self {
        let span = u32::from(self.hi - self.lo);
        let scale = |p: u8| self.lo + (span * u32::from(p.min(100)) / 100) as u8;
        Self {
            job_id: self.job_id.clone(),
            lifecycle: self.lifecycle.clone(),
            lo: scale(lo),
            hi: scale(hi.max(lo)),
        }
    }

    /// Percentage reached after `done` of `total` units.
    pub fn percent(&self, done: usize, total: usize) -> u8 {
        if total == 0 {
            return self.hi;
        }
        let span = usize::from(self.hi - self.lo);
        self.lo + (span * done.min(total) / total) as u8
    }

    /// Report `done` of `total` units. Failures are logged only.
    pub async fn report(&self, done: usize, total: usize, note: Option<String>) {
        let percent = self.percent(done, total);
        if let Err(e) = self
            .lifecycle
            .report_progress(&self.job_id, percent, note)
            .await
        {
            debug!(job_id = %self.job_id, error = %e, "Progress update rejected");
        }
    }
}
