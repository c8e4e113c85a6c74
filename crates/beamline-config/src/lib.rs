// beamline-config - configuration loading for the delivery client
//
// Supports configuration from multiple sources:
// 1. Environment variables (highest priority, BEAMLINE_* prefix)
// 2. Config file path from BEAMLINE_CONFIG env var
// 3. Config file contents from BEAMLINE_CONFIG_CONTENT env var
// 4. Default config file location (./beamline.toml)
// 5. Built-in defaults (lowest priority)

use std::time::Duration;

use anyhow::Result;
use beamline_beam::{BackoffPolicy, DeliveryPolicy};
use beamline_client::{BackpressurePolicy, TranquilizerConfig};
use beamline_core::{ClusterTuning, SegmentGranularity};
use serde::Deserialize;

mod sources;
mod validation;

pub use sources::{load_from_str, EnvSource};

/// Full client configuration as read from file and environment.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct BeamlineConfig {
    #[serde(default)]
    pub tuning: TuningSection,

    #[serde(default)]
    pub queue: QueueSection,

    #[serde(default)]
    pub delivery: DeliverySection,

    #[serde(default)]
    pub resolver: ResolverSection,
}

/// Segment/window tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TuningSection {
    #[serde(default = "default_granularity")]
    pub segment_granularity: SegmentGranularity,
    #[serde(default = "default_window_period_secs")]
    pub window_period_secs: u64,
    #[serde(default = "default_one")]
    pub partitions: usize,
    #[serde(default = "default_one")]
    pub replicants: usize,
    #[serde(default)]
    pub warming_period_secs: u64,
}

fn default_granularity() -> SegmentGranularity {
    SegmentGranularity::Hour
}

fn default_window_period_secs() -> u64 {
    600
}

fn default_one() -> usize {
    1
}

impl Default for TuningSection {
    fn default() -> Self {
        Self {
            segment_granularity: default_granularity(),
            window_period_secs: default_window_period_secs(),
            partitions: 1,
            replicants: 1,
            warming_period_secs: 0,
        }
    }
}

/// Facade queue and shutdown behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueSection {
    pub capacity: usize,
    pub workers: usize,
    pub max_batch_size: usize,
    pub backpressure: BackpressureMode,
    pub stop_deadline_secs: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            capacity: 8_192,
            workers: 4,
            max_batch_size: 128,
            backpressure: BackpressureMode::Block,
            stop_deadline_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureMode {
    Block,
    Failfast,
}

/// Per-beam retry budget.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeliverySection {
    pub max_attempts: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_multiplier: f64,
    pub push_timeout_ms: u64,
}

impl Default for DeliverySection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_initial_ms: 500,
            backoff_max_ms: 30_000,
            backoff_multiplier: 2.0,
            push_timeout_ms: 30_000,
        }
    }
}

/// Directory resolution bound.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolverSection {
    pub timeout_ms: u64,
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

impl BeamlineConfig {
    /// Load configuration from all sources with priority.
    pub fn load() -> Result<Self> {
        sources::load_config()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    pub fn cluster_tuning(&self) -> ClusterTuning {
        ClusterTuning {
            segment_granularity: self.tuning.segment_granularity,
            window_period: Duration::from_secs(self.tuning.window_period_secs),
            partitions: self.tuning.partitions,
            replicants: self.tuning.replicants,
            warming_period: Duration::from_secs(self.tuning.warming_period_secs),
        }
    }

    pub fn delivery_policy(&self) -> DeliveryPolicy {
        DeliveryPolicy {
            max_attempts: self.delivery.max_attempts,
            backoff: BackoffPolicy {
                initial: Duration::from_millis(self.delivery.backoff_initial_ms),
                max: Duration::from_millis(self.delivery.backoff_max_ms),
                multiplier: self.delivery.backoff_multiplier,
            },
            push_timeout: Duration::from_millis(self.delivery.push_timeout_ms),
        }
    }

    pub fn client_config(&self) -> TranquilizerConfig {
        TranquilizerConfig {
            queue_capacity: self.queue.capacity,
            workers: self.queue.workers,
            max_batch_size: self.queue.max_batch_size,
            backpressure: match self.queue.backpressure {
                BackpressureMode::Block => BackpressurePolicy::Block,
                BackpressureMode::Failfast => BackpressurePolicy::FailFast,
            },
            stop_deadline: Duration::from_secs(self.queue.stop_deadline_secs),
        }
    }

    pub fn resolution_timeout(&self) -> Duration {
        Duration::from_millis(self.resolver.timeout_ms)
    }
}
