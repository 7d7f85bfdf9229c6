//! Service configuration.
//!
//! Every field has a default; [`EngineConfig::from_env`] overrides individual
//! fields from environment variables. Invalid values are logged and ignored.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::ApiServerConfig;
use crate::pipeline::PurgeConfig;
use crate::policy::PolicyConfig;
use crate::scheduler::SchedulerConfig;

/// Where job records, scratch space, artifacts and logs live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// One JSON record per job.
    pub jobs_dir: PathBuf,
    /// Per-job workspaces, removed when a job ends.
    pub temp_dir: PathBuf,
    /// Per-job published artifacts.
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let base = PathBuf::from("data");
        Self {
            jobs_dir: base.join("jobs"),
            temp_dir: base.join("tmp"),
            output_dir: base.join("outputs"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

/// Input resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Timeout of one HTTP download.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Directories local-path inputs may be read from. Empty disables
    /// local inputs.
    #[serde(default)]
    pub local_input_roots: Vec<PathBuf>,
}

fn default_fetch_timeout_secs() -> u64 {
    600
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            local_input_roots: Vec::new(),
        }
    }
}

/// External programs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineBinaries {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub whisper: String,
    /// Directory holding `ggml-<tier>.bin` model files.
    pub models_dir: PathBuf,
}

impl Default for EngineBinaries {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            whisper: "whisper-cli".to_string(),
            models_dir: PathBuf::from("models"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub purge: PurgeConfig,
    #[serde(default)]
    pub binaries: EngineBinaries,
    #[serde(default)]
    pub api: ApiServerConfig,
}

impl EngineConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup`.
    ///
    /// Setting `MEDIA_JOBS_FIXED_WORKERS` switches to a fixed policy that
    /// ignores telemetry thresholds.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = Env(&lookup);
        let mut config = Self::default();

        if let Some(dir) = env.path("MEDIA_JOBS_DATA_DIR") {
            config.store.jobs_dir = dir.join("jobs");
            config.store.temp_dir = dir.join("tmp");
            config.store.output_dir = dir.join("outputs");
        }
        env.set_path("MEDIA_JOBS_TEMP_DIR", &mut config.store.temp_dir);
        env.set_path("MEDIA_JOBS_OUTPUT_DIR", &mut config.store.output_dir);
        env.set_path("MEDIA_JOBS_LOG_DIR", &mut config.store.log_dir);

        env.set("MEDIA_JOBS_MAX_WORKERS", &mut config.policy.max_workers);
        env.set("MEDIA_JOBS_MAX_PARALLEL_CHUNKS", &mut config.policy.max_parallel_chunks);
        env.set("MEDIA_JOBS_LOW_MEMORY_MIB", &mut config.policy.low_memory_mib);
        env.set("MEDIA_JOBS_EMERGENCY_AVAILABLE_MIB", &mut config.policy.emergency_available_mib);
        env.set(
            "MEDIA_JOBS_EMERGENCY_UTILIZATION_PCT",
            &mut config.policy.emergency_utilization_pct,
        );
        env.set("MEDIA_JOBS_MAX_TIER", &mut config.policy.max_tier);

        if let Some(workers) = env.parse::<usize>("MEDIA_JOBS_FIXED_WORKERS") {
            let chunk_secs = env
                .parse::<u32>("MEDIA_JOBS_FIXED_CHUNK_SECS")
                .unwrap_or(config.policy.chunk_secs_normal);
            config.policy = PolicyConfig::fixed(workers, chunk_secs, config.policy.max_tier);
        }

        env.set("MEDIA_JOBS_RETRY_INTERVAL_MS", &mut config.scheduler.retry_interval_ms);
        env.set("MEDIA_JOBS_PIPELINE_TIMEOUT_SECS", &mut config.scheduler.pipeline_timeout_secs);

        env.set("MEDIA_JOBS_FETCH_TIMEOUT_SECS", &mut config.pipeline.fetch_timeout_secs);
        if let Some(roots) = lookup("MEDIA_JOBS_LOCAL_INPUT_ROOTS") {
            config.pipeline.local_input_roots = std::env::split_paths(&roots)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }

        env.set("MEDIA_JOBS_RETENTION_DAYS", &mut config.purge.retention_days);

        env.set_string("FFMPEG_PATH", &mut config.binaries.ffmpeg);
        env.set_string("FFPROBE_PATH", &mut config.binaries.ffprobe);
        env.set_string("WHISPER_PATH", &mut config.binaries.whisper);
        env.set_path("WHISPER_MODELS_DIR", &mut config.binaries.models_dir);

        env.set_string("API_BIND_ADDRESS", &mut config.api.bind_address);
        env.set("API_PORT", &mut config.api.port);

        config
    }
}

/// Typed access to a key lookup.
struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str) -> Option<T> {
        let value = self.raw(key)?;
        match value.parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                warn!(key, value = %value, "Ignoring invalid configuration value");
                None
            }
        }
    }

    fn set<T: FromStr>(&self, key: &str, target: &mut T) {
        if let Some(value) = self.parse(key) {
            *target = value;
        }
    }

    fn set_string(&self, key: &str, target: &mut String) {
        if let Some(value) = self.raw(key) {
            *target = value;
        }
    }

    fn path(&self, key: &str) -> Option<PathBuf> {
        self.raw(key).map(PathBuf::from)
    }

    fn set_path(&self, key: &str, target: &mut PathBuf) {
        if let Some(value) = self.path(key) {
            *target = value;
        }
    }
}
