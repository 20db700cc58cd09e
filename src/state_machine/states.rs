use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a collection task inside one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Queued or parked, not yet handed to a worker
    #[default]
    Pending,
    /// A worker attempt is running
    InFlight,
    /// The last attempt failed; the supervisor has not yet decided between
    /// retrying and abandoning
    Failed,
    /// Waiting out a backoff before the next attempt
    Retrying,
    Succeeded,
    Abandoned,
}

impl TaskState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Abandoned)
    }

    /// Check if the task currently holds, or is about to hold, a worker
    pub fn is_active(&self) -> bool {
        matches!(self, Self::InFlight | Self::Failed | Self::Retrying)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InFlight => write!(f, "in_flight"),
            Self::Failed => write!(f, "failed"),
            Self::Retrying => write!(f, "retrying"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "failed" => Ok(Self::Failed),
            "retrying" => Ok(Self::Retrying),
            "succeeded" => Ok(Self::Succeeded),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(format!("Invalid task state: {s}")),
        }
    }
}

/// Stages of the reconciliation loop. The cycle has no terminal stage; it
/// runs until the process is told to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    #[default]
    Idle,
    Detecting,
    Dispatching,
    Awaiting,
    Updating,
    Sleeping,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Detecting => write!(f, "detecting"),
            Self::Dispatching => write!(f, "dispatching"),
            Self::Awaiting => write!(f, "awaiting"),
            Self::Updating => write!(f, "updating"),
            Self::Sleeping => write!(f, "sleeping"),
        }
    }
}

impl std::str::FromStr for LoopState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "detecting" => Ok(Self::Detecting),
            "dispatching" => Ok(Self::Dispatching),
            "awaiting" => Ok(Self::Awaiting),
            "updating" => Ok(Self::Updating),
            "sleeping" => Ok(Self::Sleeping),
            _ => Err(format!("Invalid loop state: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_task_states() {
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Abandoned.is_terminal());
        assert!(!TaskState::Failed.is_terminal());
        assert!(!TaskState::Retrying.is_terminal());
        assert!(TaskState::Retrying.is_active());
        assert!(!TaskState::Pending.is_active());
    }

    #[test]
    fn test_state_string_round_trip() {
        for state in [
            TaskState::Pending,
            TaskState::InFlight,
            TaskState::Failed,
            TaskState::Retrying,
            TaskState::Succeeded,
            TaskState::Abandoned,
        ] {
            assert_eq!(state.to_string().parse::<TaskState>(), Ok(state));
        }
        assert_eq!("sleeping".parse::<LoopState>(), Ok(LoopState::Sleeping));
        assert!("running".parse::<LoopState>().is_err());
    }
}
