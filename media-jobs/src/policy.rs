//! Resource policy: maps a telemetry sample to a processing configuration.
//!
//! The policy is a pure function of its inputs. Hysteresis between quality
//! tiers needs the tier currently in force, which callers pass explicitly to
//! [`ResourcePolicy::decide_from`].

use serde::{Deserialize, Serialize};

use crate::telemetry::TelemetrySample;

/// Named point on the speed/accuracy/memory trade-off curve.
///
/// Ordered from fastest and smallest to slowest and most accurate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl QualityTier {
    pub const ALL: [QualityTier; 5] = [
        QualityTier::Tiny,
        QualityTier::Base,
        QualityTier::Small,
        QualityTier::Medium,
        QualityTier::Large,
    ];

    /// Speech model name for this tier.
    pub fn model_name(&self) -> &'static str {
        match self {
            QualityTier::Tiny => "tiny",
            QualityTier::Base => "base",
            QualityTier::Small => "small",
            QualityTier::Medium => "medium",
            QualityTier::Large => "large",
        }
    }

    /// Encoder preset used when rendering at this tier.
    pub fn encoder_preset(&self) -> &'static str {
        match self {
            QualityTier::Tiny => "ultrafast",
            QualityTier::Base => "veryfast",
            QualityTier::Small => "fast",
            QualityTier::Medium | QualityTier::Large => "medium",
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.model_name())
    }
}

impl std::str::FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tiny" => Ok(QualityTier::Tiny),
            "base" => Ok(QualityTier::Base),
            "small" => Ok(QualityTier::Small),
            "medium" => Ok(QualityTier::Medium),
            "large" => Ok(QualityTier::Large),
            other => Err(format!("unknown quality tier: {other}")),
        }
    }
}

/// Coarse memory pressure band of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressure {
    Ample,
    Normal,
    Low,
    Emergency,
}

/// Thresholds and ceilings of the resource policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Upper bound on concurrent jobs.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Upper bound on segments processed at once inside one job.
    #[serde(default = "default_max_parallel_chunks")]
    pub max_parallel_chunks: usize,
    /// At or above this much available memory, long chunks are allowed.
    #[serde(default = "default_ample_memory_mib")]
    pub ample_memory_mib: u64,
    /// Below this much available memory only one worker runs.
    #[serde(default = "default_low_memory_mib")]
    pub low_memory_mib: u64,
    /// Below this much available memory segments run strictly sequentially.
    #[serde(default = "default_low_memory_mib")]
    pub sequential_floor_mib: u64,
    /// Below this much available memory the host is in an emergency.
    #[serde(default = "default_emergency_available_mib")]
    pub emergency_available_mib: u64,
    /// At or above this memory utilization the host is in an emergency.
    #[serde(default = "default_emergency_utilization_pct")]
    pub emergency_utilization_pct: f32,
    #[serde(default = "default_chunk_secs_ample")]
    pub chunk_secs_ample: u32,
    #[serde(default = "default_chunk_secs_normal")]
    pub chunk_secs_normal: u32,
    #[serde(default = "default_chunk_secs_low")]
    pub chunk_secs_low: u32,
    /// Highest tier the policy may select.
    #[serde(default = "default_max_tier")]
    pub max_tier: QualityTier,
    /// Minimum available memory for each tier above tiny.
    #[serde(default = "default_base_tier_mib")]
    pub base_tier_mib: u64,
    #[serde(default = "default_small_tier_mib")]
    pub small_tier_mib: u64,
    #[serde(default = "default_medium_tier_mib")]
    pub medium_tier_mib: u64,
    #[serde(default = "default_large_tier_mib")]
    pub large_tier_mib: u64,
    /// Extra headroom required before moving up a tier.
    #[serde(default = "default_tier_hysteresis_mib")]
    pub tier_hysteresis_mib: u64,
}

fn default_max_workers() -> usize {
    4
}

fn default_max_parallel_chunks() -> usize {
    4
}

fn default_ample_memory_mib() -> u64 {
    8192
}

fn default_low_memory_mib() -> u64 {
    2048
}

fn default_emergency_available_mib() -> u64 {
    512
}

fn default_emergency_utilization_pct() -> f32 {
    95.0
}

fn default_chunk_secs_ample() -> u32 {
    120
}

fn default_chunk_secs_normal() -> u32 {
    60
}

fn default_chunk_secs_low() -> u32 {
    30
}

fn default_max_tier() -> QualityTier {
    QualityTier::Small
}

fn default_base_tier_mib() -> u64 {
    2048
}

fn default_small_tier_mib() -> u64 {
    4096
}

fn default_medium_tier_mib() -> u64 {
    8192
}

fn default_large_tier_mib() -> u64 {
    16384
}

fn default_tier_hysteresis_mib() -> u64 {
    512
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_parallel_chunks: default_max_parallel_chunks(),
            ample_memory_mib: default_ample_memory_mib(),
            low_memory_mib: default_low_memory_mib(),
            sequential_floor_mib: default_low_memory_mib(),
            emergency_available_mib: default_emergency_available_mib(),
            emergency_utilization_pct: default_emergency_utilization_pct(),
            chunk_secs_ample: default_chunk_secs_ample(),
            chunk_secs_normal: default_chunk_secs_normal(),
            chunk_secs_low: default_chunk_secs_low(),
            max_tier: default_max_tier(),
            base_tier_mib: default_base_tier_mib(),
            small_tier_mib: default_small_tier_mib(),
            medium_tier_mib: default_medium_tier_mib(),
            large_tier_mib: default_large_tier_mib(),
            tier_hysteresis_mib: default_tier_hysteresis_mib(),
        }
    }
}

impl PolicyConfig {
    /// A policy with constant thresholds: every sample yields the same
    /// worker count, chunk length and tier (core count still caps workers).
    pub fn fixed(workers: usize, chunk_secs: u32, tier: QualityTier) -> Self {
        Self {
            max_workers: workers.max(1),
            max_parallel_chunks: 1,
            ample_memory_mib: 0,
            low_memory_mib: 0,
            sequential_floor_mib: 0,
            emergency_available_mib: 0,
            emergency_utilization_pct: 101.0,
            chunk_secs_ample: chunk_secs,
            chunk_secs_normal: chunk_secs,
            chunk_secs_low: chunk_secs,
            max_tier: tier,
            base_tier_mib: 0,
            small_tier_mib: 0,
            medium_tier_mib: 0,
            large_tier_mib: 0,
            tier_hysteresis_mib: 0,
        }
    }

    fn tier_threshold_mib(&self, tier: QualityTier) -> u64 {
        match tier {
            QualityTier::Tiny => 0,
            QualityTier::Base => self.base_tier_mib,
            QualityTier::Small => self.small_tier_mib,
            QualityTier::Medium => self.medium_tier_mib,
            QualityTier::Large => self.large_tier_mib,
        }
    }
}

/// Processing configuration derived from one telemetry sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDecision {
    /// Concurrent jobs allowed.
    pub worker_count: usize,
    /// Length of each processing window in seconds.
    pub chunk_secs: u32,
    /// Segments processed at once inside one job.
    pub parallel_chunks: usize,
    pub quality_tier: QualityTier,
    /// Encoder/decoder threads granted to each job.
    pub threads_per_job: usize,
    pub pressure: MemoryPressure,
    /// Admissions must be refused while set.
    pub emergency: bool,
}

impl ResourceDecision {
    /// Restrict this decision so it never exceeds `ceiling`.
    ///
    /// Used at chunk boundaries: live conditions may shrink a running job's
    /// parallelism but never grow it past what it was admitted with.
    pub fn capped_by(&self, ceiling: &ResourceDecision) -> ResourceDecision {
        ResourceDecision {
            worker_count: self.worker_count.min(ceiling.worker_count),
            chunk_secs: self.chunk_secs.min(ceiling.chunk_secs),
            parallel_chunks: self.parallel_chunks.min(ceiling.parallel_chunks).max(1),
            quality_tier: self.quality_tier.min(ceiling.quality_tier),
            threads_per_job: self.threads_per_job.min(ceiling.threads_per_job).max(1),
            pressure: self.pressure,
            emergency: self.emergency,
        }
    }
}

/// The resource policy.
#[derive(Debug, Clone, Default)]
pub struct ResourcePolicy {
    config: PolicyConfig,
}

impl ResourcePolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Decide without a tier in force (no hysteresis).
    pub fn decide(&self, sample: &TelemetrySample) -> ResourceDecision {
        self.decide_from(sample, None)
    }

    /// Decide given the tier currently in force.
    pub fn decide_from(
        &self,
        sample: &TelemetrySample,
        current_tier: Option<QualityTier>,
    ) -> ResourceDecision {
        let available = sample.available_mib();
        let cores = sample.cpu_core_count.max(1);
        let pressure = self.pressure(sample);
        let emergency = pressure == MemoryPressure::Emergency;

        let worker_count = if emergency || available < self.config.low_memory_mib {
            1
        } else {
            self.config.max_workers.min(cores).max(1)
        };

        let chunk_secs = match pressure {
            MemoryPressure::Ample => self.config.chunk_secs_ample,
            MemoryPressure::Normal => self.config.chunk_secs_normal,
            MemoryPressure::Low | MemoryPressure::Emergency => self.config.chunk_secs_low,
        }
        .max(1);

        let parallel_chunks = if emergency || available < self.config.sequential_floor_mib {
            1
        } else {
            self.config.max_parallel_chunks.min((cores / 2).max(1)).max(1)
        };

        let quality_tier = if emergency {
            QualityTier::Tiny
        } else {
            self.select_tier(available, current_tier)
        };

        let threads_per_job = if emergency {
            1
        } else {
            (cores / worker_count).max(1)
        };

        ResourceDecision {
            worker_count,
            chunk_secs,
            parallel_chunks,
            quality_tier,
            threads_per_job,
            pressure,
            emergency,
        }
    }

    fn pressure(&self, sample: &TelemetrySample) -> MemoryPressure {
        let available = sample.available_mib();
        if available < self.config.emergency_available_mib
            || sample.memory_utilization_pct >= self.config.emergency_utilization_pct
        {
            MemoryPressure::Emergency
        } else if available < self.config.low_memory_mib {
            MemoryPressure::Low
        } else if available >= self.config.ample_memory_mib {
            MemoryPressure::Ample
        } else {
            MemoryPressure::Normal
        }
    }

    fn select_tier(&self, available_mib: u64, current: Option<QualityTier>) -> QualityTier {
        let mut chosen = QualityTier::Tiny;
        for tier in QualityTier::ALL {
            if tier > self.config.max_tier {
                break;
            }
            let mut needed = self.config.tier_threshold_mib(tier);
            if current.is_some_and(|c| tier > c) {
                needed = needed.saturating_add(self.config.tier_hysteresis_mib);
            }
            if available_mib >= needed {
                chosen = tier;
            }
        }
        chosen
    }
}
