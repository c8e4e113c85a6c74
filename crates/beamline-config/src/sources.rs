// Configuration source loading.
//
// Priority order:
// 1. Environment variables (BEAMLINE_* prefix)
// 2. Config file path from BEAMLINE_CONFIG
// 3. Inline config content from BEAMLINE_CONFIG_CONTENT
// 4. Default config file (./beamline.toml)
// 5. Built-in defaults

use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::{BackpressureMode, BeamlineConfig};

pub const ENV_PREFIX: &str = "BEAMLINE_";

/// Where env overrides come from; a seam so tests don't mutate the
/// process environment.
pub trait EnvSource {
    /// Value for an unprefixed key, e.g. `get("PARTITIONS")` reads
    /// `BEAMLINE_PARTITIONS` in the real implementation.
    fn get(&self, key: &str) -> Option<String>;
}

struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, key: &str) -> Option<String> {
        env::var(format!("{}{}", ENV_PREFIX, key)).ok()
    }
}

/// Load configuration from all sources with priority.
pub fn load_config() -> Result<BeamlineConfig> {
    let mut config = load_from_file()?.unwrap_or_default();
    apply_env_overrides(&mut config, &StdEnvSource)?;
    config.validate()?;
    Ok(config)
}

/// Parse a TOML config document (for tests and embedding).
pub fn load_from_str(content: &str) -> Result<BeamlineConfig> {
    toml::from_str(content).context("Failed to parse config content")
}

fn load_from_file() -> Result<Option<BeamlineConfig>> {
    if let Ok(path) = env::var("BEAMLINE_CONFIG") {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        return Ok(Some(config));
    }

    if let Ok(content) = env::var("BEAMLINE_CONFIG_CONTENT") {
        let config = toml::from_str(&content)
            .context("Failed to parse inline config from BEAMLINE_CONFIG_CONTENT")?;
        return Ok(Some(config));
    }

    let path = "./beamline.toml";
    if Path::new(path).exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        return Ok(Some(config));
    }

    Ok(None)
}

/// Apply environment overrides on top of whatever the file provided.
pub fn apply_env_overrides(config: &mut BeamlineConfig, source: &dyn EnvSource) -> Result<()> {
    fn parse<T: std::str::FromStr>(source: &dyn EnvSource, key: &str) -> Result<Option<T>>
    where
        T::Err: std::fmt::Display,
    {
        match source.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("Invalid {}{}: {}", ENV_PREFIX, key, e)),
        }
    }

    if let Some(value) = parse(source, "SEGMENT_GRANULARITY")? {
        debug!("env override: segment_granularity");
        config.tuning.segment_granularity = value;
    }
    if let Some(value) = parse(source, "WINDOW_PERIOD_SECS")? {
        config.tuning.window_period_secs = value;
    }
    if let Some(value) = parse(source, "PARTITIONS")? {
        config.tuning.partitions = value;
    }
    if let Some(value) = parse(source, "REPLICANTS")? {
        config.tuning.replicants = value;
    }
    if let Some(value) = parse(source, "WARMING_PERIOD_SECS")? {
        config.tuning.warming_period_secs = value;
    }

    if let Some(value) = parse(source, "QUEUE_CAPACITY")? {
        config.queue.capacity = value;
    }
    if let Some(value) = parse(source, "WORKERS")? {
        config.queue.workers = value;
    }
    if let Some(value) = parse(source, "MAX_BATCH_SIZE")? {
        config.queue.max_batch_size = value;
    }
    if let Some(raw) = source.get("BACKPRESSURE") {
        config.queue.backpressure = match raw.to_lowercase().as_str() {
            "block" => BackpressureMode::Block,
            "failfast" | "fail-fast" => BackpressureMode::Failfast,
            other => anyhow::bail!(
                "Invalid {}BACKPRESSURE: {}. Supported: block, failfast",
                ENV_PREFIX,
                other
            ),
        };
    }
    if let Some(value) = parse(source, "STOP_DEADLINE_SECS")? {
        config.queue.stop_deadline_secs = value;
    }

    if let Some(value) = parse(source, "MAX_SEND_ATTEMPTS")? {
        config.delivery.max_attempts = value;
    }
    if let Some(value) = parse(source, "BACKOFF_INITIAL_MS")? {
        config.delivery.backoff_initial_ms = value;
    }
    if let Some(value) = parse(source, "BACKOFF_MAX_MS")? {
        config.delivery.backoff_max_ms = value;
    }
    if let Some(value) = parse(source, "PUSH_TIMEOUT_MS")? {
        config.delivery.push_timeout_ms = value;
    }
    if let Some(value) = parse(source, "RESOLUTION_TIMEOUT_MS")? {
        config.resolver.timeout_ms = value;
    }

    Ok(())
}
