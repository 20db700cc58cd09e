//! Errors reported by workers for a single attempt.
//!
//! These never leave the execution supervisor: it classifies each one as
//! transient or permanent and turns the final result into a task outcome.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Worker attempt timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// The source throttled us; `retry_after` carries its requested delay
    #[error("Rate limited by source (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    #[error("Source reports scope does not exist: {0}")]
    NotFound(String),

    #[error("Worker attempt cancelled")]
    Cancelled,

    #[error("Worker panicked: {0}")]
    Panicked(String),
}

impl WorkerError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::InvalidScope(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}
