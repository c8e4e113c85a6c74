use std::time::Duration;

use thiserror::Error;

use crate::segment::SegmentGranularity;

/// Tuning for the clustered beam lifecycle.
///
/// `window_period` is the allowed lateness after a segment's nominal end;
/// `warming_period` is the lead time before a segment's start during which
/// its beams may be pre-created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTuning {
    pub segment_granularity: SegmentGranularity,
    pub window_period: Duration,
    pub partitions: usize,
    pub replicants: usize,
    pub warming_period: Duration,
}

impl Default for ClusterTuning {
    fn default() -> Self {
        Self {
            segment_granularity: SegmentGranularity::Hour,
            window_period: Duration::from_secs(10 * 60),
            partitions: 1,
            replicants: 1,
            warming_period: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TuningError {
    #[error("partitions must be at least 1, got {0}")]
    InvalidPartitions(usize),
    #[error("replicants must be at least 1, got {0}")]
    InvalidReplicants(usize),
}

impl ClusterTuning {
    pub fn builder() -> ClusterTuningBuilder {
        ClusterTuningBuilder::default()
    }

    pub fn validate(&self) -> Result<(), TuningError> {
        if self.partitions < 1 {
            return Err(TuningError::InvalidPartitions(self.partitions));
        }
        if self.replicants < 1 {
            return Err(TuningError::InvalidReplicants(self.replicants));
        }
        Ok(())
    }

    pub fn window_period_millis(&self) -> i64 {
        self.window_period.as_millis() as i64
    }

    pub fn warming_period_millis(&self) -> i64 {
        self.warming_period.as_millis() as i64
    }
}

/// Fluent builder over [`ClusterTuning::default`].
#[derive(Debug, Clone, Default)]
pub struct ClusterTuningBuilder {
    tuning: ClusterTuning,
}

impl ClusterTuningBuilder {
    pub fn segment_granularity(mut self, granularity: SegmentGranularity) -> Self {
        self.tuning.segment_granularity = granularity;
        self
    }

    pub fn window_period(mut self, window: Duration) -> Self {
        self.tuning.window_period = window;
        self
    }

    pub fn partitions(mut self, partitions: usize) -> Self {
        self.tuning.partitions = partitions;
        self
    }

    pub fn replicants(mut self, replicants: usize) -> Self {
        self.tuning.replicants = replicants;
        self
    }

    pub fn warming_period(mut self, warming: Duration) -> Self {
        self.tuning.warming_period = warming;
        self
    }

    pub fn build(self) -> Result<ClusterTuning, TuningError> {
        self.tuning.validate()?;
        Ok(self.tuning)
    }
}
