//! # Dispatcher
//!
//! Moves tasks from the priority queue to execution supervisors without ever
//! waiting on a single slow source.
//!
//! ## Overview
//!
//! One dispatch loop runs per cycle. Each iteration first takes a slot in the
//! bounded global pool, then looks for the next admissible task:
//!
//! 1. sources parked earlier whose resource may be free again, the one
//!    with the most urgent waiting task first
//! 2. the queue, most urgent first
//!
//! A task whose source is rate limited or at its concurrency cap is *parked*
//! under that source; later tasks of a parked source join the same line
//! without touching the governor, so one blocked source never stalls the
//! others. When nothing is admissible the loop sleeps until the earliest
//! rate-limit deadline, a slot release, a queue push or a stop request.
//!
//! Admitted tasks are spawned into a [`TaskTracker`]; the dispatcher never
//! awaits their completion.

use super::execution_supervisor::ExecutionSupervisor;
use super::task_queue::TaskQueue;
use crate::models::{AbandonReason, CollectionTask, SourceId, TaskOutcome};
use crate::resilience::{Admission, RateGovernor, SourcePermit, WouldBlock};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug)]
pub struct Dispatcher {
    queue: Arc<TaskQueue>,
    governor: Arc<RateGovernor>,
    supervisor: Arc<ExecutionSupervisor>,
    pool: Arc<Semaphore>,
    pool_size: usize,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<TaskQueue>,
        governor: Arc<RateGovernor>,
        supervisor: Arc<ExecutionSupervisor>,
        global_pool_size: usize,
    ) -> Self {
        Self {
            queue,
            governor,
            supervisor,
            pool: Arc::new(Semaphore::new(global_pool_size)),
            pool_size: global_pool_size,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Global pool slots currently held by running tasks
    pub fn busy_workers(&self) -> usize {
        self.pool_size - self.pool.available_permits()
    }

    /// Start dispatching for one cycle. Terminal outcomes are delivered on
    /// `outcomes`.
    pub fn start(&self, cycle_id: Uuid, outcomes: mpsc::UnboundedSender<TaskOutcome>) -> DispatchRun {
        let stop = CancellationToken::new();
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let dispatch_loop = DispatchLoop {
            queue: Arc::clone(&self.queue),
            governor: Arc::clone(&self.governor),
            supervisor: Arc::clone(&self.supervisor),
            pool: Arc::clone(&self.pool),
            released: self.governor.slot_released_notifier(),
            cycle_id,
            outcomes,
            stop: stop.clone(),
            cancel: cancel.clone(),
            tracker: tracker.clone(),
            parked: BTreeMap::new(),
        };

        info!(cycle_id = %cycle_id, pool_size = self.pool_size, "🚀 DISPATCHER: Starting dispatch loop");

        DispatchRun {
            cycle_id,
            stop,
            cancel,
            tracker,
            handle: tokio::spawn(dispatch_loop.run()),
        }
    }
}

/// Handle to one cycle's dispatch loop and the executions it spawned
#[derive(Debug)]
pub struct DispatchRun {
    cycle_id: Uuid,
    stop: CancellationToken,
    cancel: CancellationToken,
    tracker: TaskTracker,
    handle: JoinHandle<Vec<CollectionTask>>,
}

impl DispatchRun {
    /// Stop pulling new tasks. In-flight executions keep running.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Cancel every in-flight execution; each reports itself as cancelled
    pub fn cancel_in_flight(&self) {
        self.cancel.cancel();
    }

    /// Executions still running
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for the dispatch loop to exit and return the tasks it popped but
    /// never admitted. Call [`DispatchRun::stop`] first or this waits
    /// until the loop stops for another reason.
    pub async fn join(&mut self) -> Vec<CollectionTask> {
        match (&mut self.handle).await {
            Ok(parked) => parked,
            Err(error) => {
                warn!(cycle_id = %self.cycle_id, error = %error, "dispatch loop terminated abnormally");
                Vec::new()
            }
        }
    }

    /// Stop pulling, give in-flight executions `grace` to finish, then
    /// cancel the rest and wait for them to report. Returns the parked
    /// tasks that were never admitted.
    pub async fn shutdown(mut self, grace: Duration) -> Vec<CollectionTask> {
        self.stop();
        let parked = self.join().await;

        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                cycle_id = %self.cycle_id,
                in_flight = self.tracker.len(),
                grace_ms = grace.as_millis() as u64,
                "⏱️ DISPATCHER: Grace period elapsed, cancelling in-flight tasks"
            );
            self.cancel_in_flight();
            self.tracker.wait().await;
        }

        debug!(cycle_id = %self.cycle_id, parked = parked.len(), "dispatch run shut down");
        parked
    }
}

#[derive(Debug)]
enum Blocked {
    RateLimited { until: Instant },
    ConcurrencyCapped,
}

impl Blocked {
    fn from_would_block(reason: WouldBlock, now: Instant) -> Self {
        match reason {
            WouldBlock::RateLimited { wait } => Self::RateLimited { until: now + wait },
            WouldBlock::ConcurrencyCapped => Self::ConcurrencyCapped,
        }
    }
}

#[derive(Debug)]
struct ParkedSource {
    tasks: VecDeque<CollectionTask>,
    blocked: Blocked,
}

struct DispatchLoop {
    queue: Arc<TaskQueue>,
    governor: Arc<RateGovernor>,
    supervisor: Arc<ExecutionSupervisor>,
    pool: Arc<Semaphore>,
    released: Arc<Notify>,
    cycle_id: Uuid,
    outcomes: mpsc::UnboundedSender<TaskOutcome>,
    stop: CancellationToken,
    cancel: CancellationToken,
    tracker: TaskTracker,
    parked: BTreeMap<SourceId, ParkedSource>,
}

impl DispatchLoop {
    async fn run(mut self) -> Vec<CollectionTask> {
        let mut dispatched: u64 = 0;

        loop {
            let pool_permit = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                permit = Arc::clone(&self.pool).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let Some((task, permit)) = self.next_admitted().await else {
                break;
            };

            let supervisor = Arc::clone(&self.supervisor);
            let cancel = self.cancel.child_token();
            let outcomes = self.outcomes.clone();
            let cycle_id = self.cycle_id;
            self.tracker.spawn(async move {
                let _pool_permit = pool_permit;
                supervisor
                    .supervise(task, permit, cycle_id, cancel, outcomes)
                    .await;
            });
            dispatched += 1;
        }

        let parked: Vec<CollectionTask> = std::mem::take(&mut self.parked)
            .into_values()
            .flat_map(|source| source.tasks)
            .collect();

        info!(
            cycle_id = %self.cycle_id,
            dispatched,
            parked = parked.len(),
            "🛑 DISPATCHER: Dispatch loop stopped"
        );
        parked
    }

    /// Wait until some task is admitted. `None` once stopped.
    async fn next_admitted(&mut self) -> Option<(CollectionTask, SourcePermit)> {
        loop {
            // Registered before checking so a release or push in between wakes us
            let released_notify = Arc::clone(&self.released);
            let released = released_notify.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            let queue = Arc::clone(&self.queue);
            let pushed = queue.notified();
            tokio::pin!(pushed);
            pushed.as_mut().enable();

            if let Some(admitted) = self.try_admit() {
                return Some(admitted);
            }

            let next_deadline = self.earliest_rate_deadline();
            let deadline_elapsed = async {
                match next_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                _ = self.stop.cancelled() => return None,
                _ = &mut released => {}
                _ = &mut pushed => {}
                _ = deadline_elapsed => {}
            }
        }
    }

    fn try_admit(&mut self) -> Option<(CollectionTask, SourcePermit)> {
        let now = Instant::now();

        // Parked lines compete by the urgency of their front task
        let mut order: Vec<SourceId> = self.parked.keys().cloned().collect();
        order.sort_by_key(|source_id| {
            self.parked[source_id]
                .tasks
                .front()
                .map(|task| (task.priority, task.created_at))
        });

        for source_id in order {
            let Some(parked) = self.parked.get_mut(&source_id) else {
                continue;
            };
            if let Blocked::RateLimited { until } = parked.blocked {
                if now < until {
                    continue;
                }
            }
            match self.governor.acquire(&source_id) {
                Ok(Admission::Granted(permit)) => {
                    if let Some(task) = parked.tasks.pop_front() {
                        if parked.tasks.is_empty() {
                            self.parked.remove(&source_id);
                        }
                        return Some((task, permit));
                    }
                }
                Ok(Admission::WouldBlock(reason)) => {
                    parked.blocked = Blocked::from_would_block(reason, now);
                }
                Err(error) => {
                    warn!(source_id = %source_id, error = %error, "parked source rejected by governor");
                }
            }
        }

        while let Some(task) = self.queue.pop() {
            if let Some(parked) = self.parked.get_mut(&task.source_id) {
                parked.tasks.push_back(task);
                continue;
            }

            match self.governor.acquire(&task.source_id) {
                Ok(Admission::Granted(permit)) => return Some((task, permit)),
                Ok(Admission::WouldBlock(reason)) => {
                    debug!(
                        source_id = %task.source_id,
                        reason = ?reason,
                        "parking source"
                    );
                    self.parked.insert(
                        task.source_id.clone(),
                        ParkedSource {
                            tasks: VecDeque::from([task]),
                            blocked: Blocked::from_would_block(reason, now),
                        },
                    );
                }
                Err(error) => {
                    let outcome = self.supervisor.abandon_pending(
                        task,
                        AbandonReason::Permanent,
                        Some(error.to_string()),
                        self.cycle_id,
                    );
                    if self.outcomes.send(outcome).is_err() {
                        debug!(cycle_id = %self.cycle_id, "outcome receiver closed");
                    }
                }
            }
        }

        None
    }

    fn earliest_rate_deadline(&self) -> Option<Instant> {
        self.parked
            .values()
            .filter_map(|parked| match parked.blocked {
                Blocked::RateLimited { until } => Some(until),
                Blocked::ConcurrencyCapped => None,
            })
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectorConfig;
    use crate::events::TelemetryPublisher;
    use crate::models::{GapKind, TaskPriority, TaskScope};
    use crate::registry::WorkerRegistry;
    use crate::resilience::SourceBudget;
    use crate::test_helpers::{ScriptedWorker, WorkerBehavior};
    use crate::orchestration::types::Worker;
    use chrono::Utc;

    struct Fixture {
        queue: Arc<TaskQueue>,
        governor: Arc<RateGovernor>,
        dispatcher: Dispatcher,
    }

    fn fixture(workers: Vec<(Arc<ScriptedWorker>, SourceBudget)>, pool_size: usize) -> Fixture {
        let mut config = CollectorConfig::default();
        config.execution.global_pool_size = pool_size;
        config.execution.worker_timeout_ms = 60_000;

        let registry = Arc::new(WorkerRegistry::new());
        let mut budgets = Vec::new();
        for (worker, budget) in workers {
            budgets.push((worker.source_id().clone(), budget));
            config = config.with_source(worker.source_id().as_str(), budget);
            registry.register(worker);
        }

        let governor = Arc::new(RateGovernor::new(budgets).unwrap());
        let queue = Arc::new(TaskQueue::new(100));
        let supervisor = Arc::new(ExecutionSupervisor::new(
            &config,
            Arc::clone(&governor),
            registry,
            TelemetryPublisher::disabled(),
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&governor),
            supervisor,
            pool_size,
        );
        Fixture {
            queue,
            governor,
            dispatcher,
        }
    }

    fn task(source: &str, scope: &str, priority: TaskPriority) -> CollectionTask {
        let now = Utc::now();
        CollectionTask::new(
            SourceId::new(source),
            TaskScope::new(scope),
            priority,
            GapKind::Missing,
            now,
            now,
        )
    }

    async fn collect(rx: &mut mpsc::UnboundedReceiver<TaskOutcome>, n: usize) -> Vec<TaskOutcome> {
        let mut outcomes = Vec::new();
        while outcomes.len() < n {
            outcomes.push(rx.recv().await.unwrap());
        }
        outcomes
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap_is_respected() {
        let worker = Arc::new(
            ScriptedWorker::new("weather")
                .with_default(WorkerBehavior::SucceedAfter(Duration::from_millis(100))),
        );
        let fixture = fixture(vec![(worker.clone(), SourceBudget::new(1_000.0, 100, 2))], 8);
        for i in 0..6 {
            fixture
                .queue
                .push(task("weather", &format!("day-{i}"), TaskPriority::High))
                .unwrap();
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let run = fixture.dispatcher.start(Uuid::new_v4(), tx);
        let outcomes = collect(&mut rx, 6).await;

        assert!(outcomes.iter().all(TaskOutcome::is_success));
        assert_eq!(worker.peak_concurrency(), 2);
        assert!(run.shutdown(Duration::from_secs(1)).await.is_empty());
        assert_eq!(fixture.governor.total_in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_source_does_not_stall_others() {
        let slow = Arc::new(ScriptedWorker::new("slow").with_default(WorkerBehavior::Hang));
        let fast = Arc::new(ScriptedWorker::new("fast"));
        let fixture = fixture(
            vec![
                (slow.clone(), SourceBudget::new(1_000.0, 100, 1)),
                (fast.clone(), SourceBudget::new(1_000.0, 100, 4)),
            ],
            4,
        );

        // Critical work for the capped source ahead of lower-priority work
        fixture.queue.push(task("slow", "a", TaskPriority::Critical)).unwrap();
        fixture.queue.push(task("slow", "b", TaskPriority::Critical)).unwrap();
        for i in 0..3 {
            fixture
                .queue
                .push(task("fast", &format!("f{i}"), TaskPriority::Low))
                .unwrap();
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let run = fixture.dispatcher.start(Uuid::new_v4(), tx);
        let outcomes = collect(&mut rx, 3).await;
        assert!(outcomes.iter().all(|o| o.task.source_id.as_str() == "fast"));
        assert_eq!(slow.total_attempts(), 1);

        run.cancel_in_flight();
        let parked = run.shutdown(Duration::ZERO).await;
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].scope.as_str(), "b");

        let cancelled = rx.recv().await.unwrap();
        assert_eq!(cancelled.abandon_reason(), Some(AbandonReason::Cancelled));
        assert_eq!(fixture.governor.total_in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_source_is_spaced_out() {
        let worker = Arc::new(ScriptedWorker::new("weather"));
        let fixture = fixture(vec![(worker.clone(), SourceBudget::new(2.0, 1, 4))], 4);
        for i in 0..3 {
            fixture
                .queue
                .push(task("weather", &format!("day-{i}"), TaskPriority::Medium))
                .unwrap();
        }

        let started = Instant::now();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let run = fixture.dispatcher.start(Uuid::new_v4(), tx);
        collect(&mut rx, 3).await;

        let starts: Vec<Duration> = worker
            .attempts()
            .iter()
            .map(|a| a.started_at - started)
            .collect();
        assert_eq!(starts[0], Duration::ZERO);
        assert!(starts[1] >= Duration::from_millis(500));
        assert!(starts[2] >= Duration::from_millis(1_000));
        run.shutdown(Duration::ZERO).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_most_urgent_parked_source_is_admitted_first() {
        let a = Arc::new(ScriptedWorker::new("a"));
        let z = Arc::new(ScriptedWorker::new("z"));
        let fixture = fixture(
            vec![
                (a, SourceBudget::new(1_000.0, 100, 1)),
                (z, SourceBudget::new(1_000.0, 100, 1)),
            ],
            1,
        );

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut dispatch_loop = DispatchLoop {
            queue: Arc::clone(&fixture.queue),
            governor: Arc::clone(&fixture.governor),
            supervisor: Arc::clone(&fixture.dispatcher.supervisor),
            pool: Arc::clone(&fixture.dispatcher.pool),
            released: fixture.governor.slot_released_notifier(),
            cycle_id: Uuid::new_v4(),
            outcomes: tx,
            stop: CancellationToken::new(),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            parked: BTreeMap::new(),
        };
        for (source, scope, priority) in [
            ("a", "a-low", TaskPriority::Low),
            ("z", "z-critical", TaskPriority::Critical),
        ] {
            dispatch_loop.parked.insert(
                SourceId::new(source),
                ParkedSource {
                    tasks: VecDeque::from([task(source, scope, priority)]),
                    blocked: Blocked::ConcurrencyCapped,
                },
            );
        }

        let (first, _permit) = dispatch_loop.try_admit().unwrap();
        assert_eq!(first.scope.as_str(), "z-critical");
        assert!(!dispatch_loop.parked.contains_key(&SourceId::new("z")));

        let (second, _permit) = dispatch_loop.try_admit().unwrap();
        assert_eq!(second.scope.as_str(), "a-low");
        assert!(dispatch_loop.parked.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_source_is_abandoned_after_receiver_closes() {
        let worker = Arc::new(ScriptedWorker::new("weather"));
        let fixture = fixture(vec![(worker.clone(), SourceBudget::new(1_000.0, 100, 2))], 2);
        fixture.queue.push(task("ghost", "day-1", TaskPriority::High)).unwrap();
        fixture.queue.push(task("weather", "day-1", TaskPriority::Low)).unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let run = fixture.dispatcher.start(Uuid::new_v4(), tx);
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The loop keeps dispatching after a failed outcome delivery
        assert!(fixture.queue.is_empty());
        assert_eq!(worker.total_attempts(), 1);
        assert!(run.shutdown(Duration::from_secs(1)).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_pool_bounds_total_concurrency() {
        let a = Arc::new(ScriptedWorker::new("a").with_default(WorkerBehavior::Hang));
        let b = Arc::new(ScriptedWorker::new("b").with_default(WorkerBehavior::Hang));
        let fixture = fixture(
            vec![
                (a.clone(), SourceBudget::new(1_000.0, 100, 4)),
                (b.clone(), SourceBudget::new(1_000.0, 100, 4)),
            ],
            3,
        );
        for i in 0..4 {
            fixture.queue.push(task("a", &format!("a{i}"), TaskPriority::High)).unwrap();
            fixture.queue.push(task("b", &format!("b{i}"), TaskPriority::High)).unwrap();
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let run = fixture.dispatcher.start(Uuid::new_v4(), tx);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(fixture.dispatcher.busy_workers(), 3);
        assert_eq!(fixture.governor.total_in_flight(), 3);
        assert_eq!(fixture.queue.len(), 5);

        run.cancel_in_flight();
        run.shutdown(Duration::ZERO).await;
        let cancelled = collect(&mut rx, 3).await;
        assert!(cancelled
            .iter()
            .all(|o| o.abandon_reason() == Some(AbandonReason::Cancelled)));
        assert_eq!(fixture.dispatcher.busy_workers(), 0);
    }
}
