//! Processor trait and related types.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::engines::{FetchChain, MediaEngine, TranscriptionEngine};
use crate::job::{JobInput, JobKind, MediaSource, OutputArtifact};
use crate::pipeline::progress::ProgressReporter;
use crate::policy::{ResourceDecision, ResourcePolicy};
use crate::telemetry::TelemetryProbe;

/// Live resource view of one running job.
///
/// Re-evaluates the policy on demand, never exceeding the decision the job
/// was admitted with.
#[derive(Clone)]
pub struct ResourceBudget {
    probe: Arc<dyn TelemetryProbe>,
    policy: Arc<ResourcePolicy>,
    ceiling: ResourceDecision,
}

impl ResourceBudget {
    pub fn new(
        probe: Arc<dyn TelemetryProbe>,
        policy: Arc<ResourcePolicy>,
        ceiling: ResourceDecision,
    ) -> Self {
        Self {
            probe,
            policy,
            ceiling,
        }
    }

    pub fn ceiling(&self) -> &ResourceDecision {
        &self.ceiling
    }

    /// Decision for the next stage, capped by the admission snapshot.
    pub async fn current(&self) -> ResourceDecision {
        let sample = self.probe.sample().await;
        self.policy
            .decide_from(&sample, Some(self.ceiling.quality_tier))
            .capped_by(&self.ceiling)
    }
}

/// Everything a processor needs to run one job.
#[derive(Clone)]
pub struct ProcessorContext {
    pub job_id: String,
    /// Scratch directory, removed when the job ends.
    pub workspace: PathBuf,
    /// Where published artifacts are written.
    pub output_dir: PathBuf,
    pub budget: ResourceBudget,
    pub progress: ProgressReporter,
    pub cancel: CancellationToken,
    pub fetcher: FetchChain,
    pub media: Arc<dyn MediaEngine>,
    pub transcriber: Arc<dyn TranscriptionEngine>,
}

impl ProcessorContext {
    /// Decision the job was admitted with.
    pub fn snapshot(&self) -> &ResourceDecision {
        self.budget.ceiling()
    }

    /// Resolve a source into the workspace as `<stem>.<ext>`.
    pub async fn fetch(&self, source: &MediaSource, stem: &str) -> Result<PathBuf> {
        self.fetcher.resolve(source, &self.workspace, stem).await
    }

    pub fn workspace_file(&self, name: impl AsRef<Path>) -> PathBuf {
        self.workspace.join(name)
    }

    pub fn output_file(&self, name: impl AsRef<Path>) -> PathBuf {
        self.output_dir.join(name)
    }

    /// Create the workspace and output directories.
    pub async fn prepare_dirs(&self) -> Result<()> {
        for dir in [&self.workspace, &self.output_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| crate::Error::io_path("creating", dir, e))?;
        }
        Ok(())
    }
}

/// Trait for job processors.
#[async_trait]
pub trait Processor: Send + Sync {
    /// The job kind this processor handles.
    fn kind(&self) -> JobKind;

    /// Get the processor name.
    fn name(&self) -> &'static str;

    /// Process the job and return its output artifacts.
    ///
    /// # Cancel Safety
    ///
    /// The worker drops this future when the pipeline timeout fires. Child
    /// processes are killed on drop and the job's workspace is removed by
    /// the lifecycle manager, so no partial state survives.
    async fn process(&self, ctx: &ProcessorContext, input: &JobInput)
    -> Result<Vec<OutputArtifact>>;
}
