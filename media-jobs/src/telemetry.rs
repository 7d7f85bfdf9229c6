//! Telemetry probe: memory/CPU snapshots of the host.
//!
//! A probe never fails its caller. When the operating system cannot be read
//! within the sampling budget, the last good sample is returned flagged as
//! stale.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tracing::{debug, warn};

const MIB: u64 = 1024 * 1024;

/// A point-in-time view of host resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Total physical memory in bytes.
    pub total_memory: u64,
    /// Memory available for new allocations in bytes.
    pub available_memory: u64,
    /// Logical CPU cores.
    pub cpu_core_count: usize,
    /// Used memory as a percentage of total (0-100).
    pub memory_utilization_pct: f32,
    /// Global CPU usage percentage (0-100).
    pub cpu_utilization_pct: f32,
    /// True when this is a replayed sample because the last read failed.
    pub stale: bool,
    pub sampled_at: DateTime<Utc>,
}

impl TelemetrySample {
    /// Build a sample from memory figures in MiB. Utilization is derived.
    pub fn from_mib(total_mib: u64, available_mib: u64, cpu_core_count: usize) -> Self {
        let total = total_mib * MIB;
        let available = available_mib.min(total_mib) * MIB;
        Self {
            total_memory: total,
            available_memory: available,
            cpu_core_count,
            memory_utilization_pct: utilization_pct(total, available),
            cpu_utilization_pct: 0.0,
            stale: false,
            sampled_at: Utc::now(),
        }
    }

    pub fn available_mib(&self) -> u64 {
        self.available_memory / MIB
    }

    pub fn total_mib(&self) -> u64 {
        self.total_memory / MIB
    }

    fn into_stale(mut self) -> Self {
        self.stale = true;
        self
    }
}

fn utilization_pct(total: u64, available: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    let used = total.saturating_sub(available);
    (used as f64 / total as f64 * 100.0) as f32
}

/// Source of telemetry samples.
#[async_trait]
pub trait TelemetryProbe: Send + Sync {
    /// Take a sample. Must return within a small bounded interval.
    async fn sample(&self) -> TelemetrySample;
}

/// Probe backed by the operating system via `sysinfo`.
pub struct SystemProbe {
    system: Arc<Mutex<System>>,
    last_good: Mutex<Option<TelemetrySample>>,
    budget: Duration,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self::with_budget(Duration::from_millis(250))
    }

    /// Create a probe whose reads are abandoned after `budget`.
    pub fn with_budget(budget: Duration) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        Self {
            system: Arc::new(Mutex::new(system)),
            last_good: Mutex::new(None),
            budget,
        }
    }

    fn read(system: &Mutex<System>) -> Option<TelemetrySample> {
        let mut system = system.lock();
        system.refresh_memory();
        system.refresh_cpu_usage();

        let total = system.total_memory();
        if total == 0 {
            return None;
        }
        let available = system.available_memory();
        let cores = match system.cpus().len() {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        };

        Some(TelemetrySample {
            total_memory: total,
            available_memory: available,
            cpu_core_count: cores,
            memory_utilization_pct: utilization_pct(total, available),
            cpu_utilization_pct: system.global_cpu_usage(),
            stale: false,
            sampled_at: Utc::now(),
        })
    }

    fn fallback(&self) -> TelemetrySample {
        match self.last_good.lock().clone() {
            Some(sample) => sample.into_stale(),
            None => {
                // Nothing read yet: report an empty host so the policy is conservative.
                TelemetrySample {
                    total_memory: 0,
                    available_memory: 0,
                    cpu_core_count: 1,
                    memory_utilization_pct: 100.0,
                    cpu_utilization_pct: 0.0,
                    stale: true,
                    sampled_at: Utc::now(),
                }
            }
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetryProbe for SystemProbe {
    async fn sample(&self) -> TelemetrySample {
        let system = self.system.clone();
        let read = tokio::task::spawn_blocking(move || Self::read(&system));

        match tokio::time::timeout(self.budget, read).await {
            Ok(Ok(Some(sample))) => {
                debug!(
                    available_mib = sample.available_mib(),
                    memory_pct = sample.memory_utilization_pct,
                    cpu_pct = sample.cpu_utilization_pct,
                    "Telemetry sampled"
                );
                *self.last_good.lock() = Some(sample.clone());
                sample
            }
            Ok(Ok(None)) => {
                warn!("Telemetry read returned no memory figures, using last known sample");
                self.fallback()
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Telemetry read task failed, using last known sample");
                self.fallback()
            }
            Err(_) => {
                warn!(
                    budget_ms = self.budget.as_millis() as u64,
                    "Telemetry read timed out, using last known sample"
                );
                self.fallback()
            }
        }
    }
}

/// Probe that replays a scripted sequence of samples.
///
/// Each call consumes one sample; the final sample repeats forever. Used for
/// fixed-resource deployments and for deterministic tests.
pub struct ScriptedProbe {
    samples: Mutex<VecDeque<TelemetrySample>>,
    last: Mutex<TelemetrySample>,
}

impl ScriptedProbe {
    pub fn new(samples: Vec<TelemetrySample>) -> Self {
        let mut queue: VecDeque<TelemetrySample> = samples.into();
        let first = queue
            .front()
            .cloned()
            .unwrap_or_else(|| TelemetrySample::from_mib(0, 0, 1));
        if queue.len() == 1 {
            queue.clear();
        }
        Self {
            samples: Mutex::new(queue),
            last: Mutex::new(first),
        }
    }

    /// A probe that always reports the same sample.
    pub fn fixed(sample: TelemetrySample) -> Self {
        Self::new(vec![sample])
    }

    /// Replace the sample reported from now on.
    pub fn set(&self, sample: TelemetrySample) {
        self.samples.lock().clear();
        *self.last.lock() = sample;
    }

    /// Append a sample to the script.
    pub fn push(&self, sample: TelemetrySample) {
        self.samples.lock().push_back(sample);
    }
}

#[async_trait]
impl TelemetryProbe for ScriptedProbe {
    async fn sample(&self) -> TelemetrySample {
        let next = self.samples.lock().pop_front();
        let mut last = self.last.lock();
        if let Some(sample) = next {
            *last = sample;
        }
        last.clone()
    }
}
