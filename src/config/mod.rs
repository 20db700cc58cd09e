//! # Collector Configuration
//!
//! Typed, validated configuration for every collector component. Values come
//! from a base `collector-config` file, an optional per-environment overlay
//! and `COLLECTOR__SECTION__KEY` environment overrides (see [`ConfigManager`]).
//!
//! ## Architecture
//!
//! - **Explicit Validation**: a configuration that fails [`CollectorConfig::validate`]
//!   is fatal; the collector never starts on guessed values
//! - **Environment Awareness**: development/test/production overlays
//! - **Millisecond Fields**: durations are stored as `_ms` integers with
//!   [`Duration`] accessors
//!
//! ## Usage
//!
//! ```rust,no_run
//! use collector_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let interval = manager.config().reconciliation.cycle_interval();
//! let pool = manager.config().execution.global_pool_size;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::defaults;
use crate::resilience::SourceBudget;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring collector-config.yaml
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Rate budget per source id. Every source with a registered worker must
    /// appear here, and vice versa.
    pub sources: BTreeMap<String, SourceBudget>,

    /// Worker pool and per-attempt execution settings
    pub execution: ExecutionConfig,

    /// Retry backoff for transient worker failures
    pub backoff: BackoffConfig,

    /// Cycle cadence and deadlines
    pub reconciliation: ReconciliationConfig,

    pub queue: QueueConfig,

    pub gap_detection: GapDetectionConfig,

    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Global cap on concurrently running workers across all sources
    pub global_pool_size: usize,
    /// Hard timeout for a single worker invocation
    pub worker_timeout_ms: u64,
    /// Retries after the first attempt; a task runs at most `max_retries + 1` times
    pub max_retries: u32,
    /// How long in-flight work may drain on shutdown before it is cancelled
    pub shutdown_grace_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            global_pool_size: defaults::GLOBAL_POOL_SIZE,
            worker_timeout_ms: defaults::WORKER_TIMEOUT_MS,
            max_retries: defaults::MAX_RETRIES,
            shutdown_grace_ms: defaults::SHUTDOWN_GRACE_MS,
        }
    }
}

impl ExecutionConfig {
    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Cap applied to both computed and server-requested delays
    pub max_delay_ms: u64,
    /// Exponential multiplier (default: 2.0)
    pub multiplier: f64,
    /// Whether to add jitter to prevent thundering herd
    pub jitter_enabled: bool,
    /// Maximum jitter fraction (0.0 to 1.0)
    pub max_jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: defaults::BACKOFF_BASE_DELAY_MS,
            max_delay_ms: defaults::BACKOFF_MAX_DELAY_MS,
            multiplier: defaults::BACKOFF_MULTIPLIER,
            jitter_enabled: true,
            max_jitter: defaults::BACKOFF_MAX_JITTER,
        }
    }
}

impl BackoffConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Steady-state sleep between cycles
    pub cycle_interval_ms: u64,
    /// Upper bound on the awaiting stage of a cycle
    pub cycle_deadline_ms: u64,
    /// First sleep after a systemic failure; doubles per consecutive failure
    pub systemic_retry_base_ms: u64,
    /// Ceiling for the systemic backoff, itself kept below the cycle interval
    pub systemic_retry_max_ms: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: defaults::CYCLE_INTERVAL_MS,
            cycle_deadline_ms: defaults::CYCLE_DEADLINE_MS,
            systemic_retry_base_ms: defaults::SYSTEMIC_RETRY_BASE_MS,
            systemic_retry_max_ms: defaults::SYSTEMIC_RETRY_MAX_MS,
        }
    }
}

impl ReconciliationConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }

    pub fn cycle_deadline(&self) -> Duration {
        Duration::from_millis(self.cycle_deadline_ms)
    }

    pub fn systemic_retry_base(&self) -> Duration {
        Duration::from_millis(self.systemic_retry_base_ms)
    }

    pub fn systemic_retry_max(&self) -> Duration {
        Duration::from_millis(self.systemic_retry_max_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Pushes beyond this many queued tasks are rejected, never evicted
    pub max_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_capacity: defaults::QUEUE_MAX_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GapDetectionConfig {
    /// Expected data younger than this many days is treated as recent
    pub critical_window_days: u64,
}

impl Default for GapDetectionConfig {
    fn default() -> Self {
        Self {
            critical_window_days: defaults::CRITICAL_WINDOW_DAYS,
        }
    }
}

impl GapDetectionConfig {
    pub fn critical_window(&self) -> Duration {
        Duration::from_secs(self.critical_window_days * 24 * 60 * 60)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    /// Events buffered for the sink before the oldest are dropped
    pub buffer_size: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer_size: defaults::TELEMETRY_BUFFER_SIZE,
        }
    }
}

impl CollectorConfig {
    pub fn with_source(mut self, source: impl Into<String>, budget: SourceBudget) -> Self {
        self.sources.insert(source.into(), budget);
        self
    }

    /// Validate configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.sources.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "sources",
                "collector configuration",
            ));
        }

        for (source, budget) in &self.sources {
            if source.trim().is_empty() {
                return Err(ConfigurationError::invalid_value(
                    "sources",
                    source.clone(),
                    "source ids must not be blank",
                ));
            }
            budget.validate(source)?;
        }

        if self.execution.global_pool_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "execution.global_pool_size",
                "0",
                "global pool size must be greater than 0",
            ));
        }

        if self.execution.worker_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "execution.worker_timeout_ms",
                "0",
                "worker timeout must be greater than 0",
            ));
        }

        if self.backoff.base_delay_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "backoff.base_delay_ms",
                "0",
                "base delay must be greater than 0",
            ));
        }

        if self.backoff.max_delay_ms < self.backoff.base_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "backoff.max_delay_ms",
                self.backoff.max_delay_ms.to_string(),
                "max delay must not be smaller than base delay",
            ));
        }

        if !self.backoff.multiplier.is_finite() || self.backoff.multiplier <= 1.0 {
            return Err(ConfigurationError::invalid_value(
                "backoff.multiplier",
                self.backoff.multiplier.to_string(),
                "multiplier must be a finite number greater than 1.0",
            ));
        }

        if !(0.0..1.0).contains(&self.backoff.max_jitter) {
            return Err(ConfigurationError::invalid_value(
                "backoff.max_jitter",
                self.backoff.max_jitter.to_string(),
                "jitter fraction must be in [0.0, 1.0)",
            ));
        }

        let reconciliation = &self.reconciliation;
        if reconciliation.cycle_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "reconciliation.cycle_interval_ms",
                "0",
                "cycle interval must be greater than 0",
            ));
        }

        if reconciliation.cycle_deadline_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "reconciliation.cycle_deadline_ms",
                "0",
                "cycle deadline must be greater than 0",
            ));
        }

        if reconciliation.systemic_retry_base_ms == 0
            || reconciliation.systemic_retry_base_ms >= reconciliation.cycle_interval_ms
        {
            return Err(ConfigurationError::invalid_value(
                "reconciliation.systemic_retry_base_ms",
                reconciliation.systemic_retry_base_ms.to_string(),
                "systemic retry base must be greater than 0 and shorter than the cycle interval",
            ));
        }

        if reconciliation.systemic_retry_max_ms < reconciliation.systemic_retry_base_ms {
            return Err(ConfigurationError::invalid_value(
                "reconciliation.systemic_retry_max_ms",
                reconciliation.systemic_retry_max_ms.to_string(),
                "systemic retry max must not be smaller than its base",
            ));
        }

        if self.queue.max_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "queue.max_capacity",
                "0",
                "queue capacity must be greater than 0",
            ));
        }

        if self.telemetry.buffer_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "telemetry.buffer_size",
                "0",
                "telemetry buffer must hold at least one event",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> CollectorConfig {
        CollectorConfig::default().with_source("weather", SourceBudget::new(2.0, 4, 2))
    }

    #[test]
    fn test_default_sections() {
        let config = CollectorConfig::default();
        assert_eq!(config.execution.max_retries, 3);
        assert_eq!(config.backoff.multiplier, 2.0);
        assert!(config.backoff.jitter_enabled);
        assert_eq!(config.gap_detection.critical_window(), Duration::from_secs(7 * 86_400));
        assert_eq!(config.reconciliation.cycle_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_sources_are_required() {
        let err = CollectorConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingRequiredField { .. }));
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_invalid_source_budget_is_rejected() {
        let config = valid_config().with_source("news", SourceBudget::new(1.0, 0, 1));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sources.news.burst_capacity"));
    }

    #[test]
    fn test_systemic_backoff_must_undercut_interval() {
        let mut config = valid_config();
        config.reconciliation.cycle_interval_ms = 1_000;
        config.reconciliation.systemic_retry_base_ms = 1_000;
        assert!(config.validate().is_err());

        config.reconciliation.systemic_retry_base_ms = 500;
        config.reconciliation.systemic_retry_max_ms = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_bounds() {
        let mut config = valid_config();
        config.backoff.max_delay_ms = config.backoff.base_delay_ms - 1;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.backoff.max_jitter = 1.5;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.backoff.multiplier = 0.5;
        assert!(config.validate().is_err());

        // A flat multiplier would make every retry wait the same
        let mut config = valid_config();
        config.backoff.multiplier = 1.0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.backoff.multiplier = 1.5;
        assert!(config.validate().is_ok());
    }
}
