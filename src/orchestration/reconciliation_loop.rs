//! # Reconciliation Loop
//!
//! The cyclic controller that keeps the inventory converging on the
//! expected-coverage model.
//!
//! ## Overview
//!
//! ```text
//! Idle ─▶ Detecting ─▶ Dispatching ─▶ Awaiting ─▶ Updating ─▶ Sleeping ─▶ Idle
//!             │                                      │            ▲
//!             └──────────── systemic abort ──────────┴────────────┘
//! ```
//!
//! Each cycle takes a fresh inventory snapshot, turns every gap into a task,
//! dispatches the queue and waits for outcomes until either all of them are
//! in or the cycle deadline passes. Deadline expiry is not a failure: the
//! dispatcher is stopped, in-flight work is cancelled and never-admitted
//! tasks are reported as unfinished; the next cycle re-detects them.
//!
//! Cycles never overlap. A cycle requested while another is running waits
//! for it to finish and then runs on a fresh snapshot.
//!
//! An unreachable inventory store or coverage model aborts the cycle and the
//! loop retries sooner than the normal interval, backing off exponentially
//! while the failure persists. Only configuration errors at startup are
//! fatal; nothing in a running cycle stops the loop.

use super::dispatcher::{DispatchRun, Dispatcher};
use super::execution_supervisor::ExecutionSupervisor;
use super::gap_detector::GapDetector;
use super::task_queue::TaskQueue;
use super::types::{CoverageProvider, InventoryStore};
use crate::config::{CollectorConfig, ReconciliationConfig};
use crate::error::{CollectorError, Result};
use crate::events::{TelemetryEvent, TelemetryPublisher};
use crate::logging::{log_cycle_operation, log_error};
use crate::models::{
    AbandonReason, CollectionTask, CycleReport, CycleStatus, OutcomeCounts, SourceId,
    SourceUtilization, TaskOutcome, TaskResult,
};
use crate::resilience::RateGovernor;
use crate::state_machine::{LoopEvent, LoopState, LoopStateMachine};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Interrupts the loop's sleep so the next cycle starts immediately.
///
/// A wake sent while a cycle is running is remembered and ends the sleep
/// that follows it.
#[derive(Debug, Clone)]
pub struct WakeHandle {
    notify: Arc<Notify>,
}

impl WakeHandle {
    pub fn wake(&self) {
        self.notify.notify_one();
    }
}

/// Bookkeeping for the cycle in progress
struct CycleContext {
    cycle_id: Uuid,
    started_at: DateTime<Utc>,
    started: Instant,
    counts: OutcomeCounts,
    outcomes: Vec<TaskOutcome>,
}

enum AwaitEnd {
    AllReported,
    DeadlineExpired,
    ShutdownRequested,
}

pub struct ReconciliationLoop {
    inventory: Arc<dyn InventoryStore>,
    coverage: Arc<dyn CoverageProvider>,
    detector: GapDetector,
    queue: Arc<TaskQueue>,
    governor: Arc<RateGovernor>,
    supervisor: Arc<ExecutionSupervisor>,
    dispatcher: Dispatcher,
    telemetry: TelemetryPublisher,
    config: ReconciliationConfig,
    shutdown_grace: Duration,
    state_machine: LoopStateMachine,
    wake: Arc<Notify>,
    consecutive_failures: AtomicU32,
    cycle_lock: Mutex<()>,
}

impl std::fmt::Debug for ReconciliationLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationLoop")
            .field("state", &self.state())
            .field("consecutive_failures", &self.consecutive_failures())
            .field("config", &self.config)
            .finish()
    }
}

impl ReconciliationLoop {
    pub fn new(
        config: &CollectorConfig,
        inventory: Arc<dyn InventoryStore>,
        coverage: Arc<dyn CoverageProvider>,
        queue: Arc<TaskQueue>,
        governor: Arc<RateGovernor>,
        supervisor: Arc<ExecutionSupervisor>,
        telemetry: TelemetryPublisher,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&governor),
            Arc::clone(&supervisor),
            config.execution.global_pool_size,
        );

        Self {
            inventory,
            coverage,
            detector: GapDetector::new(&config.gap_detection),
            queue,
            governor,
            supervisor,
            dispatcher,
            telemetry,
            config: config.reconciliation.clone(),
            shutdown_grace: config.execution.shutdown_grace(),
            state_machine: LoopStateMachine::new(),
            wake: Arc::new(Notify::new()),
            consecutive_failures: AtomicU32::new(0),
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state_machine.current()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LoopState> {
        self.state_machine.subscribe()
    }

    pub fn wake_handle(&self) -> WakeHandle {
        WakeHandle {
            notify: Arc::clone(&self.wake),
        }
    }

    /// Systemic aborts since the last cycle that got past detection
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// How long to sleep after the cycle that just ended.
    ///
    /// After `n` consecutive systemic aborts this is
    /// `systemic_retry_base * 2^(n-1)`, capped at `systemic_retry_max` and
    /// kept strictly below the normal `cycle_interval`.
    pub fn next_sleep(&self) -> Duration {
        let interval = self.config.cycle_interval();
        let failures = self.consecutive_failures();
        if failures == 0 {
            return interval;
        }

        let exponent = (failures - 1).min(31);
        let backoff = self
            .config
            .systemic_retry_base()
            .saturating_mul(1u32 << exponent)
            .min(self.config.systemic_retry_max());
        backoff.min(interval.saturating_sub(Duration::from_millis(1)))
    }

    /// Run cycles until `shutdown` fires. A cycle in progress when it fires
    /// drains its in-flight work for the shutdown grace period first.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval_ms = self.config.cycle_interval_ms,
            deadline_ms = self.config.cycle_deadline_ms,
            "🔄 RECONCILIATION: Loop starting"
        );

        while !shutdown.is_cancelled() {
            let report = self.cycle(&shutdown).await;
            if shutdown.is_cancelled() {
                break;
            }

            let sleep_for = self.next_sleep();
            debug!(
                cycle_id = %report.cycle_id,
                sleep_ms = sleep_for.as_millis() as u64,
                "sleeping until next cycle"
            );
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.wake.notified() => {
                    info!("⏰ RECONCILIATION: Woken before next scheduled cycle");
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }

        info!("🛑 RECONCILIATION: Loop stopped");
    }

    /// Run exactly one cycle and return its report.
    ///
    /// Waits for any cycle already in progress, including one driven by
    /// [`run`](Self::run), before starting.
    pub async fn run_cycle(&self) -> CycleReport {
        self.cycle(&CancellationToken::new()).await
    }

    async fn cycle(&self, shutdown: &CancellationToken) -> CycleReport {
        // The queue and dispatcher are shared, so one cycle owns them at a time
        let _cycle = self.cycle_lock.lock().await;
        if self.state() == LoopState::Sleeping {
            self.transition(LoopEvent::Wake);
        }

        let mut ctx = CycleContext {
            cycle_id: Uuid::new_v4(),
            started_at: Utc::now(),
            started: Instant::now(),
            counts: OutcomeCounts::default(),
            outcomes: Vec::new(),
        };
        self.governor.reset_peaks();
        self.supervisor.take_attempt_counters();

        self.transition(LoopEvent::BeginCycle);
        log_cycle_operation(
            "begin",
            &ctx.cycle_id.to_string(),
            &LoopState::Detecting.to_string(),
            "started",
            None,
            None,
        );

        let tasks = match self.detect().await {
            Ok(tasks) => tasks,
            Err(error) => return self.abort(ctx, LoopState::Detecting, &error),
        };
        ctx.counts.detected = tasks.len();
        self.transition(LoopEvent::GapsDetected);

        self.enqueue(&mut ctx, tasks);
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
        let run = self.dispatcher.start(ctx.cycle_id, outcome_tx);
        self.transition(LoopEvent::DispatchStarted);

        let status = self
            .await_outcomes(&mut ctx, run, &mut outcome_rx, shutdown)
            .await;
        self.transition(LoopEvent::OutcomesCollected);

        if let Err(error) = self.update_inventory(&mut ctx).await {
            return self.abort(ctx, LoopState::Updating, &error);
        }
        self.transition(LoopEvent::InventoryUpdated);

        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.finish(ctx, status)
    }

    async fn detect(&self) -> Result<Vec<CollectionTask>> {
        let snapshot = self.inventory.snapshot().await?;
        let coverage = self.coverage.coverage().await?;
        Ok(self.detector.detect(&snapshot, &coverage))
    }

    fn enqueue(&self, ctx: &mut CycleContext, tasks: Vec<CollectionTask>) {
        let result = self.queue.push_batch(tasks);
        ctx.counts.enqueued = result.accepted;
        ctx.counts.rejected = result.rejected.len();

        for task in result.rejected {
            self.telemetry.publish(TelemetryEvent::QueueRejected {
                cycle_id: ctx.cycle_id,
                source_id: task.source_id,
                scope: task.scope,
                capacity: self.queue.capacity(),
            });
        }
    }

    async fn await_outcomes(
        &self,
        ctx: &mut CycleContext,
        run: DispatchRun,
        outcome_rx: &mut mpsc::UnboundedReceiver<TaskOutcome>,
        shutdown: &CancellationToken,
    ) -> CycleStatus {
        let expected = ctx.counts.enqueued;
        let deadline = tokio::time::sleep_until(ctx.started + self.config.cycle_deadline());
        tokio::pin!(deadline);

        let end = loop {
            if ctx.outcomes.len() >= expected {
                break AwaitEnd::AllReported;
            }
            tokio::select! {
                outcome = outcome_rx.recv() => match outcome {
                    Some(outcome) => ctx.outcomes.push(outcome),
                    None => break AwaitEnd::AllReported,
                },
                _ = &mut deadline => break AwaitEnd::DeadlineExpired,
                _ = shutdown.cancelled() => break AwaitEnd::ShutdownRequested,
            }
        };

        let (status, parked) = match end {
            AwaitEnd::AllReported => (CycleStatus::Completed, run.shutdown(self.shutdown_grace).await),
            AwaitEnd::DeadlineExpired => {
                warn!(
                    cycle_id = %ctx.cycle_id,
                    reported = ctx.outcomes.len(),
                    expected,
                    "⏱️ RECONCILIATION: Cycle deadline expired, cancelling remaining work"
                );
                run.cancel_in_flight();
                (CycleStatus::DeadlineExpired, run.shutdown(Duration::ZERO).await)
            }
            AwaitEnd::ShutdownRequested => {
                info!(
                    cycle_id = %ctx.cycle_id,
                    grace_ms = self.shutdown_grace.as_millis() as u64,
                    "🛑 RECONCILIATION: Shutdown requested, draining in-flight work"
                );
                (CycleStatus::Interrupted, run.shutdown(self.shutdown_grace).await)
            }
        };

        // Every spawned execution has finished, so all its outcomes are queued
        while let Ok(outcome) = outcome_rx.try_recv() {
            ctx.outcomes.push(outcome);
        }

        for task in parked.into_iter().chain(self.queue.drain()) {
            let outcome =
                self.supervisor
                    .abandon_pending(task, AbandonReason::Unfinished, None, ctx.cycle_id);
            ctx.outcomes.push(outcome);
        }

        for outcome in &ctx.outcomes {
            ctx.counts.record(outcome);
        }
        status
    }

    async fn update_inventory(&self, ctx: &mut CycleContext) -> Result<()> {
        for outcome in &ctx.outcomes {
            let TaskResult::Succeeded { artifact } = &outcome.result else {
                continue;
            };
            let task = &outcome.task;
            match self
                .inventory
                .upsert(&task.source_id, &task.scope, artifact.collected_at)
                .await
            {
                Ok(()) => ctx.counts.upserted += 1,
                Err(error) if error.is_systemic() => {
                    ctx.counts.upsert_failed += 1;
                    return Err(error);
                }
                Err(error) => {
                    ctx.counts.upsert_failed += 1;
                    log_error(
                        "reconciliation_loop",
                        "upsert",
                        &error.to_string(),
                        Some(&format!("source_id={} scope={}", task.source_id, task.scope)),
                    );
                }
            }
        }
        Ok(())
    }

    fn abort(&self, ctx: CycleContext, stage: LoopState, error: &CollectorError) -> CycleReport {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        log_error(
            "reconciliation_loop",
            &stage.to_string(),
            &error.to_string(),
            Some(&format!("cycle_id={} consecutive_failures={failures}", ctx.cycle_id)),
        );
        self.transition(LoopEvent::Abort(error.to_string()));

        self.finish(
            ctx,
            CycleStatus::Aborted {
                stage,
                reason: error.to_string(),
            },
        )
    }

    fn finish(&self, ctx: CycleContext, status: CycleStatus) -> CycleReport {
        let duration = ctx.started.elapsed();
        let report = CycleReport {
            cycle_id: ctx.cycle_id,
            started_at: ctx.started_at,
            finished_at: Utc::now(),
            duration,
            sources: self.utilization(&ctx.outcomes),
            counts: ctx.counts,
            status,
        };

        let status_name = match &report.status {
            CycleStatus::Completed => "completed",
            CycleStatus::DeadlineExpired => "deadline_expired",
            CycleStatus::Interrupted => "interrupted",
            CycleStatus::Aborted { .. } => "aborted",
        };
        log_cycle_operation(
            "finish",
            &report.cycle_id.to_string(),
            &self.state().to_string(),
            status_name,
            Some(duration.as_millis() as u64),
            Some(&format!(
                "detected={} succeeded={} abandoned={} unfinished={}",
                report.counts.detected,
                report.counts.succeeded,
                report.counts.abandoned(),
                report.counts.unfinished
            )),
        );

        self.telemetry
            .publish(TelemetryEvent::CycleReport(report.clone()));
        report
    }

    fn utilization(&self, outcomes: &[TaskOutcome]) -> Vec<SourceUtilization> {
        let attempts = self.supervisor.take_attempt_counters();
        let mut terminal: BTreeMap<&SourceId, (u64, u64)> = BTreeMap::new();
        for outcome in outcomes {
            let entry = terminal.entry(&outcome.task.source_id).or_default();
            if outcome.is_success() {
                entry.0 += 1;
            } else {
                entry.1 += 1;
            }
        }

        self.governor
            .snapshot()
            .into_iter()
            .map(|gate| {
                let counters = attempts.get(&gate.source_id).copied().unwrap_or_default();
                let (succeeded, abandoned) =
                    terminal.get(&gate.source_id).copied().unwrap_or_default();
                SourceUtilization {
                    max_concurrent: gate.budget.max_concurrent,
                    attempts: counters.attempts,
                    retries: counters.retries,
                    succeeded,
                    abandoned,
                    peak_in_flight: gate.peak_in_flight,
                    source_id: Some(gate.source_id),
                }
            })
            .collect()
    }

    fn transition(&self, event: LoopEvent) {
        let event_type = event.event_type();
        if let Err(error) = self.state_machine.transition(event) {
            log_error(
                "reconciliation_loop",
                event_type,
                &error.to_string(),
                Some(&format!("state={}", self.state())),
            );
        }
    }
}
