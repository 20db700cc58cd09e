//! # Worker Error Classification
//!
//! Decides whether a failed worker attempt is worth retrying.
//!
//! ## Overview
//!
//! Transport failures, timeouts, throttling and upstream 5xx/408/429 responses
//! are *transient*: the same request may succeed later. A malformed scope, a
//! source confirming the data does not exist, other 4xx responses and worker
//! panics are *permanent*. Cancellation is reported separately so the
//! supervisor can record it as such rather than as a failure.
//!
//! ```text
//! ┌─────────────┐     ┌─────────────────┐     ┌─────────────────────┐
//! │ WorkerError │────▶│ ErrorClassifier │────▶│ ErrorClassification │
//! └─────────────┘     └─────────────────┘     └─────────────────────┘
//! ```

use super::errors::WorkerError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Primary error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Will never succeed if retried
    Permanent,
    /// May succeed on retry
    Transient,
    /// Attempt exceeded its hard timeout
    Timeout,
    /// Source asked us to slow down
    RateLimit,
    /// Connection-level failure
    Network,
    /// Stopped by the collector, not by the source
    Cancelled,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Permanent => write!(f, "Permanent"),
            ErrorCategory::Transient => write!(f, "Transient"),
            ErrorCategory::Timeout => write!(f, "Timeout"),
            ErrorCategory::RateLimit => write!(f, "Rate Limit"),
            ErrorCategory::Network => write!(f, "Network"),
            ErrorCategory::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Result of error classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub error_category: ErrorCategory,
    pub is_retryable: bool,
    /// Delay the source asked for, if any
    pub server_retry_after: Option<Duration>,
    /// Stable code for log and telemetry filtering
    pub error_code: String,
    pub error_message: String,
}

pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &WorkerError) -> ErrorClassification;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StandardErrorClassifier;

impl StandardErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    fn is_transient_status(status: u16) -> bool {
        status >= 500 || status == 408 || status == 429
    }
}

impl ErrorClassifier for StandardErrorClassifier {
    fn classify(&self, error: &WorkerError) -> ErrorClassification {
        let (error_category, is_retryable, server_retry_after, error_code) = match error {
            WorkerError::Transport(_) => (ErrorCategory::Network, true, None, "TRANSPORT_ERROR"),
            WorkerError::Timeout { .. } => (ErrorCategory::Timeout, true, None, "WORKER_TIMEOUT"),
            WorkerError::RateLimited { retry_after } => {
                (ErrorCategory::RateLimit, true, *retry_after, "SOURCE_RATE_LIMITED")
            }
            WorkerError::Upstream { status, .. } if Self::is_transient_status(*status) => {
                (ErrorCategory::Transient, true, None, "UPSTREAM_TRANSIENT")
            }
            WorkerError::Upstream { .. } => {
                (ErrorCategory::Permanent, false, None, "UPSTREAM_REJECTED")
            }
            WorkerError::InvalidScope(_) => {
                (ErrorCategory::Permanent, false, None, "INVALID_SCOPE")
            }
            WorkerError::NotFound(_) => (ErrorCategory::Permanent, false, None, "NOT_FOUND"),
            WorkerError::Panicked(_) => (ErrorCategory::Permanent, false, None, "WORKER_PANIC"),
            WorkerError::Cancelled => (ErrorCategory::Cancelled, false, None, "CANCELLED"),
        };

        ErrorClassification {
            error_category,
            is_retryable,
            server_retry_after,
            error_code: error_code.to_string(),
            error_message: error.to_string(),
        }
    }
}
