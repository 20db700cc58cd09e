//! # Collector Errors
//!
//! Crate-level error taxonomy. Task-level failures (transient and permanent)
//! never surface here: they are resolved by the execution supervisor and
//! reported as [`TaskOutcome`](crate::models::TaskOutcome)s. What remains is
//! either *systemic* (an external dependency is down, the cycle aborts and is
//! retried on a shortened backoff) or *fatal* (bad configuration, startup halts).

use crate::config::ConfigurationError;
use crate::models::SourceId;
use crate::state_machine::StateMachineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// A source with no registered budget or worker. Bootstrap rejects these,
    /// so seeing one at runtime is a wiring bug.
    #[error("Unknown source '{0}': no budget or worker registered")]
    UnknownSource(SourceId),

    #[error("Inventory store unavailable: {0}")]
    InventoryUnavailable(String),

    #[error("Expected-coverage provider unavailable: {0}")]
    CoverageUnavailable(String),

    #[error("Priority queue at capacity ({capacity} tasks), push rejected")]
    QueueCapacityExceeded { capacity: usize },

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateMachineError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CollectorError {
    /// Failures of an external dependency that abort the current cycle only.
    pub fn is_systemic(&self) -> bool {
        matches!(
            self,
            Self::InventoryUnavailable(_) | Self::CoverageUnavailable(_)
        )
    }

    /// Failures that must halt the process before any cycle runs.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::UnknownSource(_))
    }

    pub fn inventory_unavailable(reason: impl Into<String>) -> Self {
        Self::InventoryUnavailable(reason.into())
    }

    pub fn coverage_unavailable(reason: impl Into<String>) -> Self {
        Self::CoverageUnavailable(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, CollectorError>;
