//! Expiry of finished jobs.
//!
//! Terminal records older than the retention window are deleted along with
//! their output directories.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::lifecycle::JobLifecycleManager;

/// How long finished jobs are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeConfig {
    /// Age in days after which a finished job is deleted. 0 keeps everything.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Upper bound on deletions per pass before yielding.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seconds between passes.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

fn default_retention_days() -> u32 {
    7
}

fn default_batch_size() -> usize {
    100
}

fn default_check_interval_secs() -> u64 {
    3600
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            batch_size: default_batch_size(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

impl PurgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_check_interval_secs(mut self, secs: u64) -> Self {
        self.check_interval_secs = secs;
        self
    }
}

/// Deletes expired terminal jobs.
pub struct JobPurgeService {
    config: PurgeConfig,
    lifecycle: Arc<JobLifecycleManager>,
}

impl JobPurgeService {
    pub fn new(config: PurgeConfig, lifecycle: Arc<JobLifecycleManager>) -> Self {
        Self { config, lifecycle }
    }

    /// One pass over the store. Returns how many jobs were deleted.
    pub async fn run_purge(&self) -> Result<u64> {
        if self.config.retention_days == 0 {
            debug!("job expiry disabled");
            return Ok(0);
        }

        let cutoff = Utc::now() - ChronoDuration::days(i64::from(self.config.retention_days));
        let batch_size = self.config.batch_size.max(1);
        let mut total_deleted: u64 = 0;

        loop {
            let expired: Vec<String> = self
                .lifecycle
                .list(None)
                .await?
                .into_iter()
                .filter(|job| job.status.is_terminal())
                .filter(|job| job.finished_at.unwrap_or(job.updated_at) < cutoff)
                .map(|job| job.id)
                .take(batch_size)
                .collect();

            let found = expired.len();
            let mut deleted = 0;
            for id in expired {
                match self.lifecycle.delete(&id).await {
                    Ok(()) => deleted += 1,
                    Err(e) => warn!(job_id = %id, error = %e, "could not delete expired job"),
                }
            }
            total_deleted += deleted;

            if found < batch_size || deleted == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if total_deleted > 0 {
            info!(
                deleted = total_deleted,
                retention_days = self.config.retention_days,
                "expired jobs deleted"
            );
        } else {
            debug!("no expired jobs");
        }

        Ok(total_deleted)
    }

    pub fn start_background_task(self: Arc<Self>, stop: CancellationToken) {
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(self.config.check_interval_secs.max(1)));

            info!(
                retention_days = self.config.retention_days,
                interval_secs = self.config.check_interval_secs,
                "job expiry running"
            );

            loop {
                tokio::select! {
                    _ = stop.cancelled() => {
                        debug!("job expiry stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_purge().await {
                            error!(error = %e, "job expiry pass failed");
                        }
                    }
                }
            }
        });
    }

    pub fn config(&self) -> &PurgeConfig {
        &self.config
    }
}
