use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateMachineError {
    #[error("Guard condition failed: {reason}")]
    GuardFailed { reason: String },

    #[error("Invalid state transition from {from} on event '{event}'")]
    InvalidTransition { from: String, event: String },

    #[error("Retry budget exhausted after {attempts} of {max_attempts} attempts")]
    RetryBudgetExhausted { attempts: u32, max_attempts: u32 },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
