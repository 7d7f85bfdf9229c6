//! Console and file logging for the service.
//!
//! The filter sits behind a reload layer so `/api/logging` can change
//! verbosity without a restart. File output rolls daily and rolled files
//! are pruned after a week.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload,
    util::SubscriberInitExt,
};

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_LOG_FILTER: &str = "media_jobs=info,tower_http=info";

/// Rolled files are named `media-jobs.log.YYYY-MM-DD`.
const LOG_FILE_PREFIX: &str = "media-jobs.log";

const KEEP_DAYS: i64 = 7;

const PRUNE_EVERY: Duration = Duration::from_secs(24 * 60 * 60);

/// Millisecond timestamps with the host's UTC offset.
#[derive(Debug, Clone, Copy)]
struct LocalClock;

impl FormatTime for LocalClock {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

type ReloadHandle = reload::Handle<EnvFilter, Registry>;

/// Live handle on the installed subscriber.
pub struct LoggingConfig {
    filter: ReloadHandle,
    log_dir: PathBuf,
}

impl LoggingConfig {
    /// The directive currently in effect.
    pub fn get_filter(&self) -> String {
        self.filter
            .with_current(ToString::to_string)
            .unwrap_or_default()
    }

    /// Swap in a new directive such as `media_jobs=debug,tower_http=warn`.
    pub fn set_filter(&self, directive: &str) -> crate::Result<()> {
        let parsed = EnvFilter::try_new(directive)
            .map_err(|e| crate::Error::validation(format!("filter `{directive}`: {e}")))?;
        self.filter
            .reload(parsed)
            .map_err(|e| crate::Error::Other(format!("filter reload: {e}")))?;
        info!(%directive, "log filter changed");
        Ok(())
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Prune expired files now and then once a day until `stop` fires.
    pub fn start_retention_cleanup(self: &Arc<Self>, stop: CancellationToken) {
        let dir = self.log_dir.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = cleanup_old_logs(&dir, KEEP_DAYS).await {
                    warn!(dir = %dir.display(), error = %e, "log pruning failed");
                }
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(PRUNE_EVERY) => {}
                }
            }
            debug!("log pruning stopped");
        });
    }
}

/// Date stamp of a rolled log file, if `name` is one.
fn rolled_date(name: &str) -> Option<NaiveDate> {
    let stamp = name.strip_prefix(LOG_FILE_PREFIX)?.strip_prefix('.')?;
    NaiveDate::parse_from_str(stamp, "%Y-%m-%d").ok()
}

/// Remove rolled files dated before `keep_days` ago. Returns the count.
async fn cleanup_old_logs(dir: &Path, keep_days: i64) -> std::io::Result<usize> {
    let cutoff = (Utc::now() - chrono::Duration::days(keep_days)).date_naive();
    let mut removed = 0;

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let expired = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(rolled_date)
            .is_some_and(|date| date < cutoff);
        if !expired || !path.is_file() {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "could not remove expired log"),
        }
    }

    if removed > 0 {
        info!(removed, "pruned expired log files");
    }
    Ok(removed)
}

/// Install the global subscriber, writing to stderr and to a daily file
/// under `log_dir`.
///
/// Dropping the returned guard stops the background file writer.
pub fn init_logging(log_dir: impl AsRef<Path>) -> crate::Result<(Arc<LoggingConfig>, WorkerGuard)> {
    let log_dir = log_dir.as_ref().to_path_buf();
    std::fs::create_dir_all(&log_dir)
        .map_err(|e| crate::Error::io_path("creating log directory", &log_dir, e))?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter, handle) = reload::Layer::new(filter);

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX));
    let console = fmt::layer().with_timer(LocalClock);
    let file = fmt::layer()
        .with_ansi(false)
        .with_timer(LocalClock)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| crate::Error::Other(format!("installing subscriber: {e}")))?;

    Ok((
        Arc::new(LoggingConfig {
            filter: handle,
            log_dir,
        }),
        guard,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn test_rolled_date() {
        assert_eq!(
            rolled_date("media-jobs.log.2026-03-01"),
            NaiveDate::from_ymd_opt(2026, 3, 1)
        );
        assert_eq!(rolled_date("media-jobs.log"), None);
        assert_eq!(rolled_date("media-jobs.log.today"), None);
        assert_eq!(rolled_date("other.log.2026-03-01"), None);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired_rolled_files() {
        let dir = tempfile::tempdir().unwrap();
        let old = (Utc::now() - chrono::Duration::days(30)).format("%Y-%m-%d");
        let today = Utc::now().format("%Y-%m-%d");

        let old_file = dir.path().join(format!("{LOG_FILE_PREFIX}.{old}"));
        let new_file = dir.path().join(format!("{LOG_FILE_PREFIX}.{today}"));
        let other = dir.path().join("notes.txt");
        for path in [&old_file, &new_file, &other] {
            std::fs::write(path, "x").unwrap();
        }

        assert_eq!(cleanup_old_logs(dir.path(), KEEP_DAYS).await.unwrap(), 1);
        assert!(!old_file.exists());
        assert!(new_file.exists());
        assert!(other.exists());
    }
}
