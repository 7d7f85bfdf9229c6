//! Emergency sweep of job workspaces that are no longer in use.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::Error;
use crate::lifecycle::JobLifecycleManager;

/// Removes workspaces belonging to finished or unknown jobs.
///
/// Workspaces of pending and processing jobs are left alone; a running job
/// is never disturbed.
pub struct TempSweeper {
    lifecycle: Arc<JobLifecycleManager>,
}

impl TempSweeper {
    pub fn new(lifecycle: Arc<JobLifecycleManager>) -> Self {
        Self { lifecycle }
    }

    /// Sweep once and return the number of directories removed.
    pub async fn sweep(&self) -> usize {
        let root = self.lifecycle.workspace_root();
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(path = %root.display(), error = %e, "Cannot list workspaces for sweep");
                return 0;
            }
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();

            let releasable = match self.lifecycle.status(&id).await {
                Ok(record) => record.status.is_terminal(),
                Err(Error::NotFound { .. }) => true,
                Err(e) => {
                    debug!(job_id = %id, error = %e, "Skipping workspace during sweep");
                    false
                }
            };
            if !releasable {
                continue;
            }

            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Failed to sweep workspace")
                }
            }
        }

        if removed > 0 {
            info!(removed, "Swept stale job workspaces");
        }
        removed
    }
}
