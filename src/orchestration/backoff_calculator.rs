//! # Backoff Calculator
//!
//! Retry delays for transient worker failures.
//!
//! ## Overview
//!
//! The delay before retry `n` (zero-based) is `base * multiplier^n`, capped at
//! `max_delay`, then spread by up to `±max_jitter` so tasks that failed
//! together do not hit the same rate bucket together again. A source that
//! named its own delay (Retry-After) is never retried sooner than it asked,
//! though the cap still applies.
//!
//! ## Key Features
//!
//! - **Exponential Backoff**: configurable base delay and multiplier
//! - **Server-Requested Backoff**: honors source-provided retry delays
//! - **Jitter Support**: optional randomization to prevent thundering herd
//! - **Maximum Delay Caps**: prevent unbounded backoff growth

use crate::config::BackoffConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Type of backoff calculation applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    /// The source's requested delay dominated
    ServerRequested,
    /// Exponential backoff with optional jitter
    Exponential,
}

/// Result of a backoff calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffResult {
    /// Delay to actually sleep
    pub delay: Duration,
    /// Capped exponential delay before jitter
    pub pre_jitter_delay: Duration,
    pub backoff_type: BackoffType,
}

#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    config: BackoffConfig,
}

impl BackoffCalculator {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Capped exponential delay for zero-based `retry_index`, before jitter
    pub fn pre_jitter_delay(&self, retry_index: u32) -> Duration {
        let base_ms = self.config.base_delay_ms as f64;
        let max_ms = self.config.max_delay_ms as f64;
        let exponent = i32::try_from(retry_index).unwrap_or(i32::MAX);
        let exponential_ms = base_ms * self.config.multiplier.powi(exponent);

        Self::millis(exponential_ms.min(max_ms))
    }

    /// Calculate the delay before retry `retry_index`
    pub fn calculate(&self, retry_index: u32, server_requested: Option<Duration>) -> BackoffResult {
        let pre_jitter_delay = self.pre_jitter_delay(retry_index);
        let exponential = if self.config.jitter_enabled {
            self.apply_jitter(pre_jitter_delay)
        } else {
            pre_jitter_delay
        };

        match server_requested {
            Some(requested) if requested > exponential => BackoffResult {
                delay: requested.min(self.config.max_delay()),
                pre_jitter_delay,
                backoff_type: BackoffType::ServerRequested,
            },
            _ => BackoffResult {
                delay: exponential,
                pre_jitter_delay,
                backoff_type: BackoffType::Exponential,
            },
        }
    }

    /// Apply jitter to delay to prevent thundering herd
    fn apply_jitter(&self, delay: Duration) -> Duration {
        let max_jitter = self.config.max_jitter;
        if max_jitter <= 0.0 || delay.is_zero() {
            return delay;
        }

        let factor = 1.0 + rand::thread_rng().gen_range(-max_jitter..=max_jitter);
        let jittered_ms = delay.as_secs_f64() * 1_000.0 * factor;
        Self::millis(jittered_ms.min(self.config.max_delay_ms as f64))
    }

    fn millis(ms: f64) -> Duration {
        if ms.is_finite() && ms > 0.0 {
            Duration::from_micros((ms * 1_000.0) as u64)
        } else {
            Duration::ZERO
        }
    }
}
