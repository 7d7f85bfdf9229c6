//! Resource-adaptive scheduler.
//!
//! Admits pending jobs into a bounded set of worker slots. Every admission
//! round samples telemetry and asks the resource policy for the worker count;
//! jobs that do not fit stay pending and are retried on the next round.
//! While the host is in an emergency no job is admitted and finished job
//! workspaces are swept.

mod sweep;
mod worker;

pub use sweep::TempSweeper;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, broadcast};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::engines::EngineSet;
use crate::error::JobErrorKind;
use crate::lifecycle::JobLifecycleManager;
use crate::pipeline::{ProcessorContext, ProcessorRegistry, ProgressReporter, ResourceBudget};
use crate::policy::{QualityTier, ResourceDecision, ResourcePolicy};
use crate::telemetry::{TelemetryProbe, TelemetrySample};
use crate::{Error, Result};
use worker::{JobWorker, SlotGuard};

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between admission rounds while nothing wakes the loop.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Wall-clock ceiling of one job's pipeline.
    #[serde(default = "default_pipeline_timeout_secs")]
    pub pipeline_timeout_secs: u64,
}

fn default_retry_interval_ms() -> u64 {
    1000
}

fn default_pipeline_timeout_secs() -> u64 {
    3 * 3600
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval_ms(),
            pipeline_timeout_secs: default_pipeline_timeout_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms.max(1))
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline_timeout_secs.max(1))
    }
}

/// Events emitted by the scheduler.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// Admissions are refused from now on.
    EmergencyEntered {
        available_mib: u64,
        memory_utilization_pct: f32,
    },
    /// Admissions resume.
    EmergencyCleared { available_mib: u64 },
    /// Workspaces released by an emergency sweep.
    Swept { removed: usize },
}

/// Outcome of one admission round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Jobs moved to processing.
    pub admitted: Vec<String>,
    /// Pending jobs failed because they were cancelled before admission.
    pub cancelled: Vec<String>,
    /// Admission was refused because of an emergency.
    pub refused: bool,
    /// Why admission was deferred, when it was.
    pub deferral: Option<String>,
}

/// Refuse admission while the decision is in emergency mode.
fn admission_gate(sample: &TelemetrySample, decision: &ResourceDecision) -> Result<()> {
    if decision.emergency {
        return Err(Error::ResourceExhaustion(format!(
            "{} MiB available, below the emergency floor",
            sample.available_mib()
        )));
    }
    Ok(())
}

/// Point-in-time view of the scheduler for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub active_workers: usize,
    pub pending: usize,
    pub emergency: bool,
    pub decision: Option<ResourceDecision>,
    pub sample: Option<TelemetrySample>,
}

pub struct Scheduler {
    config: SchedulerConfig,
    lifecycle: Arc<JobLifecycleManager>,
    probe: Arc<dyn TelemetryProbe>,
    policy: Arc<ResourcePolicy>,
    processors: ProcessorRegistry,
    engines: EngineSet,
    sweeper: TempSweeper,
    active: Arc<AtomicUsize>,
    slot_freed: Arc<Notify>,
    tracker: TaskTracker,
    in_emergency: AtomicBool,
    /// Tier in force, for hysteresis.
    current_tier: Mutex<Option<QualityTier>>,
    last: Mutex<Option<(TelemetrySample, ResourceDecision)>>,
    events: broadcast::Sender<SchedulerEvent>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        lifecycle: Arc<JobLifecycleManager>,
        probe: Arc<dyn TelemetryProbe>,
        policy: Arc<ResourcePolicy>,
        processors: ProcessorRegistry,
        engines: EngineSet,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            sweeper: TempSweeper::new(lifecycle.clone()),
            config,
            lifecycle,
            probe,
            policy,
            processors,
            engines,
            active: Arc::new(AtomicUsize::new(0)),
            slot_freed: Arc::new(Notify::new()),
            tracker: TaskTracker::new(),
            in_emergency: AtomicBool::new(false),
            current_tier: Mutex::new(None),
            last: Mutex::new(None),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_emergency(&self) -> bool {
        self.in_emergency.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SchedulerStatus {
        let last = self.last.lock().clone();
        let (sample, decision) = match last {
            Some((sample, decision)) => (Some(sample), Some(decision)),
            None => (None, None),
        };
        SchedulerStatus {
            active_workers: self.active_workers(),
            pending: self.lifecycle.queue().len(),
            emergency: self.is_emergency(),
            decision,
            sample,
        }
    }

    /// Run admission rounds until `cancel` fires.
    ///
    /// A round runs whenever a job is queued, a worker slot frees up, or the
    /// retry interval elapses.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            retry_interval_ms = self.config.retry_interval_ms,
            pipeline_timeout_secs = self.config.pipeline_timeout_secs,
            "Scheduler started"
        );

        loop {
            if let Err(e) = self.tick().await {
                error!(error = %e, "Admission round failed");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.lifecycle.queue().notified() => {}
                _ = self.slot_freed.notified() => {}
                _ = tokio::time::sleep(self.config.retry_interval()) => {}
            }
        }

        info!(active = self.active_workers(), "Scheduler stopped admitting jobs");
    }

    /// Wait up to `grace` for running jobs to finish.
    pub async fn shutdown(&self, grace: Duration) {
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                active = self.active_workers(),
                "Jobs still running at shutdown; they will be marked interrupted on next start"
            );
        }
    }

    /// One admission round.
    pub async fn tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();

        let sample = self.probe.sample().await;
        let decision = {
            let mut tier = self.current_tier.lock();
            let decision = self.policy.decide_from(&sample, *tier);
            *tier = Some(decision.quality_tier);
            decision
        };
        if sample.stale {
            debug!("Deciding from a stale telemetry sample");
        }
        *self.last.lock() = Some((sample.clone(), decision.clone()));

        // Ids whose cancellation could not be recorded go back to the queue
        // head once this tick is done with it.
        let mut deferred = Vec::new();
        for id in self.lifecycle.take_cancelled_pending() {
            if !deferred.is_empty() {
                deferred.push(id);
                continue;
            }
            match self.fail_cancelled_pending(&id, &decision).await {
                Ok(true) => report.cancelled.push(id),
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        job_id = %id,
                        error = %e,
                        "Could not cancel pending job, retrying next tick"
                    );
                    deferred.push(id);
                }
            }
        }

        if self.update_emergency(&sample, decision.emergency) {
            let removed = self.sweeper.sweep().await;
            let _ = self.events.send(SchedulerEvent::Swept { removed });
        }

        if !deferred.is_empty() {
            for id in deferred.into_iter().rev() {
                self.lifecycle.queue().push_front(id);
            }
            // The store just failed; admit nothing until the next tick.
            return Ok(report);
        }
        if let Err(e) = admission_gate(&sample, &decision) {
            if !self.lifecycle.queue().is_empty() {
                debug!(
                    pending = self.lifecycle.queue().len(),
                    error = %e,
                    "Admission deferred"
                );
            }
            report.refused = true;
            report.deferral = Some(e.to_string());
            return Ok(report);
        }

        while self.active_workers() < decision.worker_count {
            let Some(id) = self.lifecycle.queue().pop() else {
                break;
            };
            match self.lifecycle.admit(&id, decision.clone()).await {
                Ok((record, token)) => {
                    let processor = self.processors.get(record.kind);
                    let ctx = self.context(&id, decision.clone(), token);
                    let worker = JobWorker {
                        lifecycle: self.lifecycle.clone(),
                        processor,
                        ctx,
                        timeout: self.config.pipeline_timeout(),
                        slot: SlotGuard::acquire(self.active.clone(), self.slot_freed.clone()),
                    };
                    self.tracker.spawn(worker.run(record));
                    report.admitted.push(id);
                }
                Err(Error::NotFound { .. }) => {
                    debug!(job_id = %id, "Queued job no longer exists");
                }
                Err(Error::InvalidStateTransition { from, .. }) => {
                    debug!(job_id = %id, status = %from, "Queued job is no longer pending");
                }
                Err(e) => {
                    warn!(
                        job_id = %id,
                        error = %e,
                        "Could not admit job, retrying next tick"
                    );
                    self.lifecycle.queue().push_front(id);
                    break;
                }
            }
        }

        if !self.lifecycle.queue().is_empty() {
            debug!(
                pending = self.lifecycle.queue().len(),
                active = self.active_workers(),
                workers = decision.worker_count,
                "No free worker slot, jobs stay pending"
            );
        }
        Ok(report)
    }

    fn context(
        &self,
        id: &str,
        decision: ResourceDecision,
        cancel: CancellationToken,
    ) -> ProcessorContext {
        ProcessorContext {
            job_id: id.to_string(),
            workspace: self.lifecycle.workspace(id),
            output_dir: self.lifecycle.output_dir(id),
            budget: ResourceBudget::new(self.probe.clone(), self.policy.clone(), decision),
            progress: ProgressReporter::new(id, self.lifecycle.clone()),
            cancel,
            fetcher: self.engines.fetcher.clone(),
            media: self.engines.media.clone(),
            transcriber: self.engines.transcriber.clone(),
        }
    }

    /// A pending job cancelled before admission still passes through
    /// processing so its history follows the state machine.
    ///
    /// `Ok(false)` means the job is gone or already left pending. An error
    /// leaves the record pending so the caller can queue it again.
    async fn fail_cancelled_pending(
        &self,
        id: &str,
        decision: &ResourceDecision,
    ) -> Result<bool> {
        match self.lifecycle.admit(id, decision.clone()).await {
            Ok(_) => {}
            Err(Error::NotFound { .. } | Error::InvalidStateTransition { .. }) => return Ok(false),
            Err(e) => return Err(e),
        }
        let error = crate::error::JobError::new(
            JobErrorKind::Cancelled,
            "Job cancelled before processing started",
        );
        if let Err(e) = self.lifecycle.fail(id, error).await {
            // Recovery marks it interrupted on the next start.
            warn!(job_id = %id, error = %e, "Could not record cancellation");
            return Ok(false);
        }
        Ok(true)
    }

    /// Track emergency transitions. Returns true when an emergency starts.
    fn update_emergency(&self, sample: &TelemetrySample, emergency: bool) -> bool {
        let was = self.in_emergency.swap(emergency, Ordering::SeqCst);
        match (was, emergency) {
            (false, true) => {
                warn!(
                    available_mib = sample.available_mib(),
                    memory_pct = sample.memory_utilization_pct,
                    "Memory emergency, refusing admissions"
                );
                let _ = self.events.send(SchedulerEvent::EmergencyEntered {
                    available_mib: sample.available_mib(),
                    memory_utilization_pct: sample.memory_utilization_pct,
                });
                true
            }
            (true, false) => {
                info!(
                    available_mib = sample.available_mib(),
                    "Memory emergency cleared, admissions resume"
                );
                let _ = self.events.send(SchedulerEvent::EmergencyCleared {
                    available_mib: sample.available_mib(),
                });
                false
            }
            _ => false,
        }
    }
}
