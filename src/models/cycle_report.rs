//! # Cycle Reporting
//!
//! Per-task outcomes produced by the execution supervisor and the per-cycle
//! summary the reconciliation loop assembles from them. A [`CycleReport`] is
//! written once, when its cycle ends, and handed to telemetry.

use super::artifact::ArtifactDescriptor;
use super::task::{CollectionTask, SourceId};
use crate::state_machine::LoopState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Why a task ended without success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonReason {
    /// The worker reported a non-retryable failure
    Permanent,
    /// Every allowed attempt failed transiently
    RetriesExhausted,
    /// Cancelled mid-flight by the cycle deadline or shutdown
    Cancelled,
    /// The worker or its supervisor panicked
    Panicked,
    /// Never admitted before the cycle deadline
    Unfinished,
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permanent => write!(f, "permanent"),
            Self::RetriesExhausted => write!(f, "retries_exhausted"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Panicked => write!(f, "panicked"),
            Self::Unfinished => write!(f, "unfinished"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TaskResult {
    Succeeded {
        artifact: ArtifactDescriptor,
    },
    Abandoned {
        reason: AbandonReason,
        last_error: Option<String>,
    },
}

/// Terminal result of one collection task. Exactly one is produced per task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task: CollectionTask,
    pub result: TaskResult,
}

impl TaskOutcome {
    pub fn succeeded(task: CollectionTask, artifact: ArtifactDescriptor) -> Self {
        Self {
            task,
            result: TaskResult::Succeeded { artifact },
        }
    }

    pub fn abandoned(
        task: CollectionTask,
        reason: AbandonReason,
        last_error: Option<String>,
    ) -> Self {
        Self {
            task,
            result: TaskResult::Abandoned { reason, last_error },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, TaskResult::Succeeded { .. })
    }

    pub fn abandon_reason(&self) -> Option<AbandonReason> {
        match &self.result {
            TaskResult::Abandoned { reason, .. } => Some(*reason),
            TaskResult::Succeeded { .. } => None,
        }
    }
}

/// Task counts for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub detected: usize,
    pub enqueued: usize,
    /// Refused by the queue at capacity
    pub rejected: usize,
    pub succeeded: usize,
    pub abandoned_permanent: usize,
    pub abandoned_retries_exhausted: usize,
    pub cancelled: usize,
    pub panicked: usize,
    pub unfinished: usize,
    pub upserted: usize,
    pub upsert_failed: usize,
}

impl OutcomeCounts {
    pub fn record(&mut self, outcome: &TaskOutcome) {
        match outcome.abandon_reason() {
            None => self.succeeded += 1,
            Some(AbandonReason::Permanent) => self.abandoned_permanent += 1,
            Some(AbandonReason::RetriesExhausted) => self.abandoned_retries_exhausted += 1,
            Some(AbandonReason::Cancelled) => self.cancelled += 1,
            Some(AbandonReason::Panicked) => self.panicked += 1,
            Some(AbandonReason::Unfinished) => self.unfinished += 1,
        }
    }

    /// Tasks that reached any terminal outcome
    pub fn terminal(&self) -> usize {
        self.succeeded + self.abandoned()
    }

    pub fn abandoned(&self) -> usize {
        self.abandoned_permanent
            + self.abandoned_retries_exhausted
            + self.cancelled
            + self.panicked
            + self.unfinished
    }
}

/// Per-source activity within one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUtilization {
    pub source_id: Option<SourceId>,
    pub max_concurrent: usize,
    pub attempts: u64,
    pub retries: u64,
    pub succeeded: u64,
    pub abandoned: u64,
    pub peak_in_flight: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleStatus {
    Completed,
    /// The awaiting stage hit the cycle deadline; not a failure
    DeadlineExpired,
    /// Shutdown was requested while awaiting; in-flight work was drained
    Interrupted,
    /// A systemic failure ended the cycle early
    Aborted { stage: LoopState, reason: String },
}

impl CycleStatus {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
    pub status: CycleStatus,
    pub counts: OutcomeCounts,
    pub sources: Vec<SourceUtilization>,
}

impl CycleReport {
    pub fn is_aborted(&self) -> bool {
        self.status.is_aborted()
    }

    pub fn source(&self, source_id: &SourceId) -> Option<&SourceUtilization> {
        self.sources
            .iter()
            .find(|s| s.source_id.as_ref() == Some(source_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GapKind, TaskPriority, TaskScope};

    fn task() -> CollectionTask {
        let now = Utc::now();
        CollectionTask::new(
            SourceId::new("weather"),
            TaskScope::new("day-1"),
            TaskPriority::High,
            GapKind::Stale,
            now,
            now,
        )
    }

    #[test]
    fn test_outcome_counts_record_every_reason() {
        let mut counts = OutcomeCounts::default();
        counts.record(&TaskOutcome::succeeded(
            task(),
            ArtifactDescriptor::new("s3://bucket/a", 10, Utc::now()),
        ));
        for reason in [
            AbandonReason::Permanent,
            AbandonReason::RetriesExhausted,
            AbandonReason::Cancelled,
            AbandonReason::Panicked,
            AbandonReason::Unfinished,
        ] {
            counts.record(&TaskOutcome::abandoned(task(), reason, None));
        }

        assert_eq!(counts.succeeded, 1);
        assert_eq!(counts.abandoned(), 5);
        assert_eq!(counts.terminal(), 6);
    }

    #[test]
    fn test_cycle_status_serialization() {
        let status = CycleStatus::Aborted {
            stage: LoopState::Detecting,
            reason: "inventory down".to_string(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "aborted");
        assert_eq!(json["stage"], "detecting");
        assert!(status.is_aborted());
    }
}
