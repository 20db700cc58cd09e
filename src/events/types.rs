use crate::constants::events;
use crate::models::{CycleReport, SourceId, TaskOutcome, TaskScope};
use serde::Serialize;
use uuid::Uuid;

/// Structured events handed to the telemetry sink
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// A task reached Succeeded or Abandoned
    TaskTerminal { cycle_id: Uuid, outcome: TaskOutcome },
    /// The queue refused a detected task at capacity
    QueueRejected {
        cycle_id: Uuid,
        source_id: SourceId,
        scope: TaskScope,
        capacity: usize,
    },
    /// Written once at the end of every cycle, aborted ones included
    CycleReport(CycleReport),
}

impl TelemetryEvent {
    /// Stable event name for routing and filtering
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::TaskTerminal { outcome, .. } if outcome.is_success() => events::TASK_SUCCEEDED,
            Self::TaskTerminal { .. } => events::TASK_ABANDONED,
            Self::QueueRejected { .. } => events::QUEUE_REJECTED,
            Self::CycleReport(report) if report.is_aborted() => events::CYCLE_ABORTED,
            Self::CycleReport(_) => events::CYCLE_COMPLETED,
        }
    }

    pub fn cycle_id(&self) -> Uuid {
        match self {
            Self::TaskTerminal { cycle_id, .. } | Self::QueueRejected { cycle_id, .. } => *cycle_id,
            Self::CycleReport(report) => report.cycle_id,
        }
    }
}
