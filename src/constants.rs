//! # System Constants
//!
//! Operational defaults and telemetry event names shared across the collector.
//! Configuration values override the defaults; the event names are stable
//! identifiers consumed by downstream telemetry sinks.

/// Telemetry event names emitted by the collector
pub mod events {
    pub const TASK_SUCCEEDED: &str = "task.succeeded";
    pub const TASK_ABANDONED: &str = "task.abandoned";
    pub const QUEUE_REJECTED: &str = "queue.rejected";
    pub const CYCLE_COMPLETED: &str = "cycle.completed";
    pub const CYCLE_ABORTED: &str = "cycle.aborted";
}

/// Configuration file and environment naming
pub mod config {
    /// Base configuration file stem, resolved with any supported extension
    pub const CONFIG_FILE_STEM: &str = "collector-config";
    pub const DEFAULT_CONFIG_DIRECTORY: &str = "config";
    /// Prefix for `COLLECTOR__SECTION__KEY` environment overrides
    pub const ENV_OVERRIDE_PREFIX: &str = "COLLECTOR";
    pub const ENV_OVERRIDE_SEPARATOR: &str = "__";
    pub const DEFAULT_ENVIRONMENT: &str = "development";
}

pub mod defaults {
    /// Expected data younger than this is "recent" for gap priority purposes
    pub const CRITICAL_WINDOW_DAYS: u64 = 7;

    pub const GLOBAL_POOL_SIZE: usize = 16;
    pub const WORKER_TIMEOUT_MS: u64 = 30_000;
    pub const MAX_RETRIES: u32 = 3;
    pub const SHUTDOWN_GRACE_MS: u64 = 10_000;

    pub const BACKOFF_BASE_DELAY_MS: u64 = 1_000;
    pub const BACKOFF_MAX_DELAY_MS: u64 = 60_000;
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const BACKOFF_MAX_JITTER: f64 = 0.1;

    pub const CYCLE_INTERVAL_MS: u64 = 300_000;
    pub const CYCLE_DEADLINE_MS: u64 = 240_000;
    pub const SYSTEMIC_RETRY_BASE_MS: u64 = 5_000;
    pub const SYSTEMIC_RETRY_MAX_MS: u64 = 60_000;

    pub const QUEUE_MAX_CAPACITY: usize = 10_000;
    pub const TELEMETRY_BUFFER_SIZE: usize = 1_024;
}
