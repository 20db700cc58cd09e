//! Per-source rate and concurrency budgets.

use crate::config::ConfigurationError;
use serde::{Deserialize, Serialize};

/// Rate and concurrency limits for one external source.
///
/// Grants in any window of length `T` never exceed
/// `rate_per_second * T + burst_capacity`, and in-flight work never exceeds
/// `max_concurrent`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceBudget {
    /// Sustained token refill rate
    pub rate_per_second: f64,
    /// Token bucket size; the bucket starts full
    pub burst_capacity: u32,
    /// Hard cap on simultaneously in-flight tasks, independent of rate
    pub max_concurrent: usize,
}

impl SourceBudget {
    pub fn new(rate_per_second: f64, burst_capacity: u32, max_concurrent: usize) -> Self {
        Self {
            rate_per_second,
            burst_capacity,
            max_concurrent,
        }
    }

    pub fn validate(&self, source: &str) -> Result<(), ConfigurationError> {
        if !self.rate_per_second.is_finite() || self.rate_per_second <= 0.0 {
            return Err(ConfigurationError::invalid_value(
                format!("sources.{source}.rate_per_second"),
                self.rate_per_second.to_string(),
                "rate must be a finite number greater than 0",
            ));
        }

        if self.burst_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                format!("sources.{source}.burst_capacity"),
                "0",
                "burst capacity must be at least 1",
            ));
        }

        if self.max_concurrent == 0 {
            return Err(ConfigurationError::invalid_value(
                format!("sources.{source}.max_concurrent"),
                "0",
                "max_concurrent must be at least 1",
            ));
        }

        Ok(())
    }
}
