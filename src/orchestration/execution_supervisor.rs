//! # Execution Supervisor
//!
//! Runs one admitted collection task to a terminal outcome.
//!
//! ## Overview
//!
//! The supervisor owns a task from the moment the dispatcher admits it. Each
//! attempt runs the source's [`Worker`] under a hard timeout; failures are
//! classified and either retried with backoff or abandoned. Every step goes
//! through the [`TaskStateMachine`], so the attempt budget is enforced by the
//! same guard that validates the transition.
//!
//! ```text
//! Pending ─▶ InFlight ─▶ Succeeded
//!               │
//!               ▼
//!            Failed ─▶ Retrying ─(backoff, new permit)─▶ InFlight
//!               │
//!               ▼
//!           Abandoned
//! ```
//!
//! ## Key Features
//!
//! - **Slot hygiene**: the source permit is dropped before every backoff
//!   sleep and on every exit path; each retry reacquires a token and a slot
//! - **Panic isolation**: a panicking worker is caught and abandoned as
//!   permanent; a panic in the supervisor itself still yields an outcome
//! - **Exactly one outcome**: an [`OutcomeReporter`] guard reports each task
//!   once, to the cycle's channel and to telemetry

use super::backoff_calculator::BackoffCalculator;
use super::error_classifier::{ErrorCategory, ErrorClassifier, StandardErrorClassifier};
use super::errors::WorkerError;
use super::types::Worker;
use crate::config::CollectorConfig;
use crate::events::{TelemetryEvent, TelemetryPublisher};
use crate::logging::{log_error, log_task_operation};
use crate::models::{
    AbandonReason, ArtifactDescriptor, CollectionTask, SourceId, TaskOutcome, TaskResult,
};
use crate::registry::WorkerRegistry;
use crate::resilience::{RateGovernor, SourcePermit};
use crate::state_machine::{TaskEvent, TaskState, TaskStateMachine};
use dashmap::DashMap;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-source attempt counters accumulated between resets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptCounters {
    pub attempts: u64,
    pub retries: u64,
}

/// Sends the single outcome of a task.
///
/// If the guard is dropped without [`OutcomeReporter::finish`] having run
/// (the supervisor future panicked), it reports the task as
/// `Abandoned(Panicked)` instead.
pub struct OutcomeReporter {
    task: Option<CollectionTask>,
    cycle_id: Uuid,
    outcomes: mpsc::UnboundedSender<TaskOutcome>,
    telemetry: TelemetryPublisher,
}

impl OutcomeReporter {
    pub fn new(
        task: CollectionTask,
        cycle_id: Uuid,
        outcomes: mpsc::UnboundedSender<TaskOutcome>,
        telemetry: TelemetryPublisher,
    ) -> Self {
        Self {
            task: Some(task),
            cycle_id,
            outcomes,
            telemetry,
        }
    }

    /// The task while it is still being supervised
    pub fn task_mut(&mut self) -> Option<&mut CollectionTask> {
        self.task.as_mut()
    }

    pub fn finish(mut self, result: TaskResult) {
        if let Some(task) = self.task.take() {
            self.send(TaskOutcome { task, result });
        }
    }

    fn send(&self, outcome: TaskOutcome) {
        log_outcome(&outcome);
        self.telemetry.publish(TelemetryEvent::TaskTerminal {
            cycle_id: self.cycle_id,
            outcome: outcome.clone(),
        });
        // The receiver is gone only once the cycle has stopped listening
        if self.outcomes.send(outcome).is_err() {
            debug!(cycle_id = %self.cycle_id, "outcome receiver closed");
        }
    }
}

impl Drop for OutcomeReporter {
    fn drop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.status = TaskState::Abandoned;
            let outcome = TaskOutcome::abandoned(
                task,
                AbandonReason::Panicked,
                Some("supervisor terminated before reporting".to_string()),
            );
            self.send(outcome);
        }
    }
}

pub struct ExecutionSupervisor {
    governor: Arc<RateGovernor>,
    workers: Arc<WorkerRegistry>,
    classifier: Arc<dyn ErrorClassifier>,
    backoff: BackoffCalculator,
    state_machine: TaskStateMachine,
    worker_timeout: Duration,
    telemetry: TelemetryPublisher,
    counters: DashMap<SourceId, AttemptCounters>,
}

impl std::fmt::Debug for ExecutionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionSupervisor")
            .field("max_attempts", &self.state_machine.max_attempts())
            .field("worker_timeout", &self.worker_timeout)
            .finish()
    }
}

impl ExecutionSupervisor {
    pub fn new(
        config: &CollectorConfig,
        governor: Arc<RateGovernor>,
        workers: Arc<WorkerRegistry>,
        telemetry: TelemetryPublisher,
    ) -> Self {
        Self {
            governor,
            workers,
            classifier: Arc::new(StandardErrorClassifier::new()),
            backoff: BackoffCalculator::new(config.backoff.clone()),
            state_machine: TaskStateMachine::new(config.execution.max_retries),
            worker_timeout: config.execution.worker_timeout(),
            telemetry,
            counters: DashMap::new(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.state_machine.max_attempts()
    }

    /// Drive `task` to a terminal outcome and report it on `outcomes`.
    ///
    /// `permit` is the slot the dispatcher acquired for the first attempt.
    /// Firing `cancel` aborts the current attempt or backoff and reports the
    /// task as cancelled.
    pub async fn supervise(
        &self,
        task: CollectionTask,
        permit: SourcePermit,
        cycle_id: Uuid,
        cancel: CancellationToken,
        outcomes: mpsc::UnboundedSender<TaskOutcome>,
    ) {
        let mut reporter = OutcomeReporter::new(task, cycle_id, outcomes, self.telemetry.clone());
        let Some(task) = reporter.task_mut() else {
            return;
        };
        let result = self.run_to_completion(task, permit, &cancel).await;
        reporter.finish(result);
    }

    /// Abandon a task that was never admitted, returning its outcome.
    ///
    /// Publishes the terminal telemetry event; the caller accounts for the
    /// outcome itself.
    pub fn abandon_pending(
        &self,
        mut task: CollectionTask,
        reason: AbandonReason,
        last_error: Option<String>,
        cycle_id: Uuid,
    ) -> TaskOutcome {
        let message = last_error.clone().unwrap_or_else(|| reason.to_string());
        self.apply(&mut task, TaskEvent::Abandon(message));
        let outcome = TaskOutcome::abandoned(task, reason, last_error);
        log_outcome(&outcome);
        self.telemetry.publish(TelemetryEvent::TaskTerminal {
            cycle_id,
            outcome: outcome.clone(),
        });
        outcome
    }

    /// Return and reset the per-source attempt counters
    pub fn take_attempt_counters(&self) -> HashMap<SourceId, AttemptCounters> {
        let counters = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        self.counters.clear();
        counters
    }

    async fn run_to_completion(
        &self,
        task: &mut CollectionTask,
        permit: SourcePermit,
        cancel: &CancellationToken,
    ) -> TaskResult {
        let worker = match self.workers.get(&task.source_id) {
            Ok(worker) => worker,
            Err(error) => {
                log_error("execution_supervisor", "resolve_worker", &error.to_string(), None);
                self.apply(task, TaskEvent::Abandon(error.to_string()));
                return TaskResult::Abandoned {
                    reason: AbandonReason::Permanent,
                    last_error: Some(error.to_string()),
                };
            }
        };

        let mut first_permit = Some(permit);
        let mut last_error: Option<String> = None;

        loop {
            let permit = match first_permit.take() {
                Some(permit) => permit,
                None => match self.governor.acquire_waiting(&task.source_id, cancel).await {
                    Ok(Some(permit)) => permit,
                    Ok(None) => return self.cancelled(task, last_error),
                    Err(error) => {
                        self.apply(task, TaskEvent::Cancel);
                        return TaskResult::Abandoned {
                            reason: AbandonReason::Permanent,
                            last_error: Some(error.to_string()),
                        };
                    }
                },
            };

            self.apply(task, TaskEvent::Start);
            self.record_attempt(task);

            let result = self.run_attempt(&worker, task, cancel).await;
            drop(permit);

            let error = match result {
                Ok(artifact) => {
                    self.apply(task, TaskEvent::Succeed);
                    return TaskResult::Succeeded { artifact };
                }
                Err(_) if cancel.is_cancelled() => return self.cancelled(task, last_error),
                Err(error) => error,
            };

            let classification = self.classifier.classify(&error);
            last_error = Some(classification.error_message.clone());
            self.apply(task, TaskEvent::fail_with_error(error.to_string()));

            if !classification.is_retryable {
                let reason = if classification.error_category == ErrorCategory::Cancelled {
                    AbandonReason::Cancelled
                } else {
                    AbandonReason::Permanent
                };
                self.apply(task, TaskEvent::Abandon(classification.error_code.clone()));
                return TaskResult::Abandoned { reason, last_error };
            }

            if !self.state_machine.can_retry(task) {
                self.apply(task, TaskEvent::Abandon("retry budget exhausted".to_string()));
                return TaskResult::Abandoned {
                    reason: AbandonReason::RetriesExhausted,
                    last_error,
                };
            }

            self.apply(task, TaskEvent::Retry);
            let backoff = self.backoff.calculate(
                task.attempt_count.saturating_sub(1),
                classification.server_retry_after,
            );
            debug!(
                task_id = %task.task_id,
                source_id = %task.source_id,
                attempt = task.attempt_count,
                category = %classification.error_category,
                delay_ms = backoff.delay.as_millis() as u64,
                pre_jitter_ms = backoff.pre_jitter_delay.as_millis() as u64,
                "🔁 SUPERVISOR: Backing off before retry"
            );

            tokio::select! {
                _ = cancel.cancelled() => return self.cancelled(task, last_error),
                _ = tokio::time::sleep(backoff.delay) => {}
            }
        }
    }

    async fn run_attempt(
        &self,
        worker: &Arc<dyn Worker>,
        task: &CollectionTask,
        cancel: &CancellationToken,
    ) -> Result<ArtifactDescriptor, WorkerError> {
        let deadline = Instant::now() + self.worker_timeout;
        let attempt_cancel = cancel.child_token();
        let execution =
            AssertUnwindSafe(worker.execute(&task.scope, deadline, attempt_cancel.clone()))
                .catch_unwind();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WorkerError::Cancelled),
            result = tokio::time::timeout_at(deadline, execution) => match result {
                Ok(Ok(result)) => result,
                Ok(Err(panic)) => Err(WorkerError::Panicked(panic_message(&*panic))),
                Err(_) => Err(WorkerError::Timeout { elapsed: self.worker_timeout }),
            },
        };

        // Stop anything the worker left running for this attempt
        attempt_cancel.cancel();
        result
    }

    fn cancelled(&self, task: &mut CollectionTask, last_error: Option<String>) -> TaskResult {
        self.apply(task, TaskEvent::Cancel);
        TaskResult::Abandoned {
            reason: AbandonReason::Cancelled,
            last_error,
        }
    }

    fn record_attempt(&self, task: &CollectionTask) {
        let mut counters = self.counters.entry(task.source_id.clone()).or_default();
        counters.attempts += 1;
        if task.attempt_count > 1 {
            counters.retries += 1;
        }
    }

    fn apply(&self, task: &mut CollectionTask, event: TaskEvent) {
        let event_type = event.event_type();
        if let Err(error) = self.state_machine.transition(task, event) {
            log_error(
                "execution_supervisor",
                event_type,
                &error.to_string(),
                Some(&format!("task_id={} status={}", task.task_id, task.status)),
            );
        }
    }
}

fn log_outcome(outcome: &TaskOutcome) {
    let task = &outcome.task;
    match &outcome.result {
        TaskResult::Succeeded { artifact } => {
            log_task_operation(
                "collect",
                &task.task_id.to_string(),
                task.source_id.as_str(),
                task.scope.as_str(),
                "succeeded",
                Some(&format!("attempts={} location={}", task.attempt_count, artifact.location)),
            );
        }
        TaskResult::Abandoned { reason, last_error } => {
            warn!(
                task_id = %task.task_id,
                source_id = %task.source_id,
                scope = %task.scope,
                attempts = task.attempt_count,
                reason = %reason,
                last_error = last_error.as_deref(),
                "❌ SUPERVISOR: Task abandoned"
            );
            log_task_operation(
                "collect",
                &task.task_id.to_string(),
                task.source_id.as_str(),
                task.scope.as_str(),
                "abandoned",
                Some(&format!("reason={reason}")),
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffConfig;
    use crate::models::{GapKind, TaskPriority, TaskScope};
    use crate::resilience::{Admission, SourceBudget};
    use crate::test_helpers::{ScriptedWorker, WorkerBehavior};
    use chrono::Utc;

    fn weather() -> SourceId {
        SourceId::new("weather")
    }

    fn task(scope: &str) -> CollectionTask {
        let now = Utc::now();
        CollectionTask::new(
            weather(),
            TaskScope::new(scope),
            TaskPriority::High,
            GapKind::Missing,
            now,
            now,
        )
    }

    struct Harness {
        governor: Arc<RateGovernor>,
        worker: Arc<ScriptedWorker>,
        supervisor: ExecutionSupervisor,
    }

    fn harness(worker: ScriptedWorker, max_retries: u32) -> Harness {
        let mut config = CollectorConfig::default()
            .with_source("weather", SourceBudget::new(1_000.0, 100, 2));
        config.execution.max_retries = max_retries;
        config.execution.worker_timeout_ms = 1_000;
        config.backoff = BackoffConfig {
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter_enabled: false,
            max_jitter: 0.0,
        };

        let governor = Arc::new(
            RateGovernor::new([(weather(), SourceBudget::new(1_000.0, 100, 2))]).unwrap(),
        );
        let worker = Arc::new(worker);
        let workers = Arc::new(WorkerRegistry::new());
        workers.register(worker.clone());
        let supervisor = ExecutionSupervisor::new(
            &config,
            Arc::clone(&governor),
            workers,
            TelemetryPublisher::disabled(),
        );
        Harness {
            governor,
            worker,
            supervisor,
        }
    }

    async fn supervise(harness: &Harness, task: CollectionTask, cancel: CancellationToken) -> TaskOutcome {
        let permit = match harness.governor.acquire(&weather()).unwrap() {
            Admission::Granted(permit) => permit,
            Admission::WouldBlock(reason) => panic!("unexpected block: {reason:?}"),
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        harness
            .supervisor
            .supervise(task, permit, Uuid::new_v4(), cancel, tx)
            .await;
        let outcome = rx.recv().await.unwrap();
        assert!(rx.try_recv().is_err(), "exactly one outcome per task");
        outcome
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let harness = harness(ScriptedWorker::new("weather"), 3);
        let outcome = supervise(&harness, task("day-1"), CancellationToken::new()).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.task.status, TaskState::Succeeded);
        assert_eq!(outcome.task.attempt_count, 1);
        assert_eq!(harness.governor.in_flight(&weather()).unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retry_with_growing_backoff() {
        let worker = ScriptedWorker::new("weather").with_script(
            "day-1",
            vec![
                WorkerBehavior::Fail(WorkerError::transport("reset")),
                WorkerBehavior::Fail(WorkerError::upstream(503, "unavailable")),
                WorkerBehavior::Succeed,
            ],
        );
        let harness = harness(worker, 3);
        let outcome = supervise(&harness, task("day-1"), CancellationToken::new()).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.task.attempt_count, 3);

        let starts = harness.worker.attempt_starts("day-1");
        assert_eq!(starts[1] - starts[0], Duration::from_millis(100));
        assert_eq!(starts[2] - starts[1], Duration::from_millis(200));

        let counters = harness.supervisor.take_attempt_counters();
        assert_eq!(
            counters[&weather()],
            AttemptCounters {
                attempts: 3,
                retries: 2
            }
        );
        assert!(harness.supervisor.take_attempt_counters().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_is_bounded() {
        let worker = ScriptedWorker::new("weather")
            .with_default(WorkerBehavior::Fail(WorkerError::transport("down")));
        let harness = harness(worker, 2);
        let outcome = supervise(&harness, task("day-1"), CancellationToken::new()).await;

        assert_eq!(outcome.abandon_reason(), Some(AbandonReason::RetriesExhausted));
        assert_eq!(outcome.task.attempt_count, 3);
        assert_eq!(harness.worker.attempt_count("day-1"), 3);
        assert_eq!(harness.governor.in_flight(&weather()).unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let worker = ScriptedWorker::new("weather")
            .with_default(WorkerBehavior::Fail(WorkerError::not_found("no such day")));
        let harness = harness(worker, 3);
        let outcome = supervise(&harness, task("day-1"), CancellationToken::new()).await;

        assert_eq!(outcome.abandon_reason(), Some(AbandonReason::Permanent));
        assert_eq!(outcome.task.attempt_count, 1);
        assert_eq!(outcome.task.status, TaskState::Abandoned);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transient() {
        let worker = ScriptedWorker::new("weather").with_script(
            "day-1",
            vec![WorkerBehavior::SucceedAfter(Duration::from_secs(5))],
        );
        let harness = harness(worker, 1);
        let outcome = supervise(&harness, task("day-1"), CancellationToken::new()).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.task.attempt_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_timing_out_worker_exhausts_retries() {
        let worker = ScriptedWorker::new("weather").with_default(WorkerBehavior::Hang);
        let harness = harness(worker, 3);
        let outcome = supervise(&harness, task("day-1"), CancellationToken::new()).await;

        assert_eq!(outcome.abandon_reason(), Some(AbandonReason::RetriesExhausted));
        assert_eq!(outcome.task.status, TaskState::Abandoned);
        assert_eq!(outcome.task.attempt_count, 4);
        assert_eq!(harness.worker.attempt_count("day-1"), 4);
        assert_eq!(harness.governor.in_flight(&weather()).unwrap(), 0);

        // Each gap is the 1s timeout plus a doubling backoff
        let starts = harness.worker.attempt_starts("day-1");
        let gaps: Vec<Duration> = starts.windows(2).map(|pair| pair[1] - pair[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(1_100),
                Duration::from_millis(1_200),
                Duration::from_millis(1_400),
            ]
        );
        assert!(gaps.windows(2).all(|pair| pair[1] > pair[0]));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(harness.worker.attempt_count("day-1"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_panic_is_abandoned_and_slot_released() {
        let worker = ScriptedWorker::new("weather")
            .with_default(WorkerBehavior::Panic("parser exploded".to_string()));
        let harness = harness(worker, 3);
        let outcome = supervise(&harness, task("day-1"), CancellationToken::new()).await;

        assert_eq!(outcome.abandon_reason(), Some(AbandonReason::Permanent));
        assert_eq!(outcome.task.attempt_count, 1);
        match &outcome.result {
            TaskResult::Abandoned { last_error, .. } => {
                assert!(last_error.as_deref().unwrap().contains("parser exploded"));
            }
            TaskResult::Succeeded { .. } => panic!("expected abandonment"),
        }
        assert_eq!(harness.governor.in_flight(&weather()).unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_mid_attempt() {
        let worker = ScriptedWorker::new("weather").with_default(WorkerBehavior::Hang);
        let harness = harness(worker, 3);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = supervise(&harness, task("day-1"), cancel).await;
        assert_eq!(outcome.abandon_reason(), Some(AbandonReason::Cancelled));
        assert_eq!(outcome.task.status, TaskState::Abandoned);
        assert_eq!(harness.governor.in_flight(&weather()).unwrap(), 0);
    }

    #[test]
    fn test_reporter_drop_reports_panicked() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = OutcomeReporter::new(
            task("day-1"),
            Uuid::nil(),
            tx,
            TelemetryPublisher::disabled(),
        );
        drop(reporter);

        let outcome = rx.try_recv().unwrap();
        assert_eq!(outcome.abandon_reason(), Some(AbandonReason::Panicked));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_abandon_pending_marks_task_abandoned() {
        let harness = harness(ScriptedWorker::new("weather"), 3);
        let outcome = harness.supervisor.abandon_pending(
            task("day-1"),
            AbandonReason::Unfinished,
            None,
            Uuid::nil(),
        );
        assert_eq!(outcome.task.status, TaskState::Abandoned);
        assert_eq!(outcome.task.attempt_count, 0);
        assert_eq!(outcome.abandon_reason(), Some(AbandonReason::Unfinished));
    }
}
