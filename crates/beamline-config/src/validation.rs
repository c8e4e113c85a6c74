// Configuration validation, run after all sources are merged.

use anyhow::{bail, Result};

use crate::BeamlineConfig;

pub fn validate_config(config: &BeamlineConfig) -> Result<()> {
    if config.tuning.partitions < 1 {
        bail!("tuning.partitions must be at least 1");
    }
    if config.tuning.replicants < 1 {
        bail!("tuning.replicants must be at least 1");
    }

    if config.queue.capacity < 1 {
        bail!("queue.capacity must be at least 1");
    }
    if config.queue.workers < 1 {
        bail!("queue.workers must be at least 1");
    }
    if config.queue.max_batch_size < 1 {
        bail!("queue.max_batch_size must be at least 1");
    }

    if config.delivery.max_attempts < 1 {
        bail!("delivery.max_attempts must be at least 1");
    }
    if config.delivery.backoff_multiplier < 1.0 {
        bail!("delivery.backoff_multiplier must be at least 1.0");
    }
    if config.delivery.backoff_max_ms < config.delivery.backoff_initial_ms {
        bail!("delivery.backoff_max_ms must not be below delivery.backoff_initial_ms");
    }
    if config.delivery.push_timeout_ms < 1 {
        bail!("delivery.push_timeout_ms must be at least 1");
    }

    if config.resolver.timeout_ms < 1 {
        bail!("resolver.timeout_ms must be at least 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        validate_config(&BeamlineConfig::default()).unwrap();
    }

    #[test]
    fn zero_partitions_rejected() {
        let mut config = BeamlineConfig::default();
        config.tuning.partitions = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("partitions"));
    }

    #[test]
    fn backoff_cap_below_initial_rejected() {
        let mut config = BeamlineConfig::default();
        config.delivery.backoff_initial_ms = 5_000;
        config.delivery.backoff_max_ms = 1_000;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("backoff_max_ms"));
    }

    #[test]
    fn zero_queue_capacity_rejected() {
        let mut config = BeamlineConfig::default();
        config.queue.capacity = 0;
        assert!(validate_config(&config).is_err());
    }
}
