use serde::{Deserialize, Serialize};

/// Events that drive collection task transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TaskEvent {
    /// Begin a worker attempt
    Start,
    /// The worker returned an artifact
    Succeed,
    /// The attempt failed with the given error
    Fail(String),
    /// Schedule another attempt after backoff
    Retry,
    /// Give up with the given reason
    Abandon(String),
    /// Stopped by cycle deadline or shutdown
    Cancel,
}

impl TaskEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Succeed => "succeed",
            Self::Fail(_) => "fail",
            Self::Retry => "retry",
            Self::Abandon(_) => "abandon",
            Self::Cancel => "cancel",
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) | Self::Abandon(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}

/// Events that drive the reconciliation loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LoopEvent {
    BeginCycle,
    GapsDetected,
    DispatchStarted,
    OutcomesCollected,
    InventoryUpdated,
    /// A systemic failure ends the cycle early
    Abort(String),
    Wake,
}

impl LoopEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::BeginCycle => "begin_cycle",
            Self::GapsDetected => "gaps_detected",
            Self::DispatchStarted => "dispatch_started",
            Self::OutcomesCollected => "outcomes_collected",
            Self::InventoryUpdated => "inventory_updated",
            Self::Abort(_) => "abort",
            Self::Wake => "wake",
        }
    }
}
