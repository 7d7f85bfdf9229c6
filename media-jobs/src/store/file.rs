//! JSON-file-per-job repository.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{JobMutator, JobRepository, apply_update, verify_outputs};
use crate::job::{JobInput, JobRecord, JobStatus};
use crate::{Error, Result};

/// Stores each job as `<id>.json` under one directory.
///
/// Writes go to a temporary file in the same directory which is synced and
/// renamed over the record, so a crash leaves either the old or the new
/// record. Updates to one id are serialized by a per-id lock.
pub struct FileJobRepository {
    dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileJobRepository {
    /// Open (creating if needed) a repository rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::io_path("creating", &dir, e))?;

        let removed = remove_stale_temp_files(&dir).await;
        if removed > 0 {
            info!(dir = %dir.display(), removed, "Removed incomplete record writes");
        }

        Ok(Self {
            dir,
            locks: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::not_found("Job", id));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    /// Per-record lock. Malformed ids are rejected before an entry is made.
    fn lock_for(&self, id: &str) -> Result<Arc<Mutex<()>>> {
        self.record_path(id)?;
        Ok(self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Drop the lock entry for `id` unless another caller holds it.
    fn release(&self, id: &str) {
        self.locks.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Run `op` under the record lock, forgetting the lock if the record
    /// turns out not to exist.
    async fn with_lock<T, F>(&self, id: &str, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let lock = self.lock_for(id)?;
        let result = {
            let _guard = lock.lock().await;
            op.await
        };
        drop(lock);
        if matches!(result, Err(Error::NotFound { .. })) {
            self.release(id);
        }
        result
    }

    async fn read(&self, id: &str) -> Result<JobRecord> {
        let path = self.record_path(id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found("Job", id));
            }
            Err(e) => return Err(Error::io_path("reading", &path, e)),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write(&self, record: &JobRecord) -> Result<()> {
        let path = self.record_path(&record.id)?;
        let dir = self.dir.clone();
        let json = serde_json::to_vec_pretty(record)?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)
                .map_err(|e| Error::io_path("creating temp file in", &dir, e))?;
            tmp.write_all(&json)
                .and_then(|_| tmp.as_file().sync_all())
                .map_err(|e| Error::io_path("writing", tmp.path(), e))?;
            tmp.persist(&path)
                .map_err(|e| Error::io_path("replacing", &path, e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Other(format!("Record write task failed: {e}")))?
    }
}

/// Remove temp files left by a crash mid-write.
async fn remove_stale_temp_files(dir: &Path) -> usize {
    let mut removed = 0;
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return 0;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(".tmp") {
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Failed to remove temp file")
                }
            }
        }
    }
    removed
}

#[async_trait]
impl JobRepository for FileJobRepository {
    async fn create_job(&self, input: JobInput) -> Result<JobRecord> {
        let record = JobRecord::new(input);
        let lock = self.lock_for(&record.id)?;
        let _guard = lock.lock().await;
        self.write(&record).await?;
        debug!(job_id = %record.id, kind = %record.kind, "Job record created");
        Ok(record)
    }

    async fn get_job(&self, id: &str) -> Result<JobRecord> {
        self.with_lock(id, self.read(id)).await
    }

    async fn update_job(&self, id: &str, mutate: JobMutator) -> Result<JobRecord> {
        self.with_lock(id, async {
            let current = self.read(id).await?;
            let mut next = apply_update(&current, mutate)?;
            if next.status == JobStatus::Completed {
                verify_outputs(&mut next).await;
            }
            self.write(&next).await?;
            Ok(next)
        })
        .await
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        let path = self.record_path(id)?;
        self.with_lock(id, async {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(Error::not_found("Job", id))
                }
                Err(e) => Err(Error::io_path("removing", &path, e)),
            }
        })
        .await?;
        self.release(id);
        Ok(())
    }

    async fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::io_path("listing", &self.dir, e))?;

        let mut jobs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.get_job(id).await {
                Ok(job) => jobs.push(job),
                // Deleted between listing and reading.
                Err(Error::NotFound { .. }) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable job record")
                }
            }
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }
}
