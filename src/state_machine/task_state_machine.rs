use super::{
    errors::{StateMachineError, StateMachineResult},
    events::TaskEvent,
    states::TaskState,
};
use crate::models::CollectionTask;
use chrono::Utc;
use tracing::trace;

/// Guarded transition table for collection tasks.
///
/// ```text
/// Pending ──start──▶ InFlight ──succeed──▶ Succeeded
///                       │
///                      fail
///                       ▼
///                    Failed ──retry──▶ Retrying ──start──▶ InFlight
///                       │
///                    abandon ──▶ Abandoned ◀── cancel (Pending | InFlight | Retrying)
/// ```
///
/// `retry` is guarded by the attempt budget, so a task can be started at
/// most `max_retries + 1` times.
#[derive(Debug, Clone, Copy)]
pub struct TaskStateMachine {
    max_attempts: u32,
}

impl TaskStateMachine {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Apply `event` to `task`, updating its status and attempt bookkeeping
    pub fn transition(
        &self,
        task: &mut CollectionTask,
        event: TaskEvent,
    ) -> StateMachineResult<TaskState> {
        let current_state = task.status;
        let target_state = Self::determine_target_state(current_state, &event)?;

        self.check_guards(task, target_state)?;

        if target_state == TaskState::InFlight {
            task.mark_attempt(Utc::now());
        }
        task.status = target_state;

        trace!(
            task_id = %task.task_id,
            from = %current_state,
            to = %target_state,
            event = event.event_type(),
            attempt = task.attempt_count,
            "task transition"
        );

        Ok(target_state)
    }

    /// Whether another attempt fits in the budget
    pub fn can_retry(&self, task: &CollectionTask) -> bool {
        task.attempt_count < self.max_attempts
    }

    fn determine_target_state(
        current_state: TaskState,
        event: &TaskEvent,
    ) -> StateMachineResult<TaskState> {
        let target = match (current_state, event) {
            (TaskState::Pending, TaskEvent::Start) => TaskState::InFlight,
            (TaskState::Retrying, TaskEvent::Start) => TaskState::InFlight,

            (TaskState::InFlight, TaskEvent::Succeed) => TaskState::Succeeded,
            (TaskState::InFlight, TaskEvent::Fail(_)) => TaskState::Failed,

            (TaskState::Failed, TaskEvent::Retry) => TaskState::Retrying,
            (TaskState::Failed, TaskEvent::Abandon(_)) => TaskState::Abandoned,

            (TaskState::Pending, TaskEvent::Abandon(_)) => TaskState::Abandoned,
            (TaskState::Pending, TaskEvent::Cancel) => TaskState::Abandoned,
            (TaskState::InFlight, TaskEvent::Cancel) => TaskState::Abandoned,
            (TaskState::Retrying, TaskEvent::Cancel) => TaskState::Abandoned,

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    fn check_guards(
        &self,
        task: &CollectionTask,
        target_state: TaskState,
    ) -> StateMachineResult<()> {
        if target_state == TaskState::Retrying && !self.can_retry(task) {
            return Err(StateMachineError::RetryBudgetExhausted {
                attempts: task.attempt_count,
                max_attempts: self.max_attempts,
            });
        }
        Ok(())
    }
}
