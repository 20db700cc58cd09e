// Scripted Worker - deterministic worker behavior for supervisor and
// dispatcher tests.
//
// Each scope can carry a script consumed one behavior per attempt; once the
// script runs out the worker falls back to its default behavior.

use crate::models::{ArtifactDescriptor, SourceId, TaskScope};
use crate::orchestration::errors::WorkerError;
use crate::orchestration::types::Worker;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What a scripted worker does for one attempt
#[derive(Debug, Clone)]
pub enum WorkerBehavior {
    Succeed,
    /// Work for `Duration` (cooperatively cancellable), then succeed
    SucceedAfter(Duration),
    Fail(WorkerError),
    /// Never finish on its own; returns `Cancelled` once cancelled
    Hang,
    Panic(String),
}

#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub scope: TaskScope,
    pub started_at: Instant,
}

#[derive(Debug)]
pub struct ScriptedWorker {
    source_id: SourceId,
    default_behavior: WorkerBehavior,
    scripts: Mutex<HashMap<TaskScope, VecDeque<WorkerBehavior>>>,
    attempts: Mutex<Vec<AttemptRecord>>,
    running: AtomicUsize,
    peak_running: AtomicUsize,
}

impl ScriptedWorker {
    pub fn new(source_id: impl Into<SourceId>) -> Self {
        Self {
            source_id: source_id.into(),
            default_behavior: WorkerBehavior::Succeed,
            scripts: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
        }
    }

    pub fn with_default(mut self, behavior: WorkerBehavior) -> Self {
        self.default_behavior = behavior;
        self
    }

    pub fn with_script(self, scope: impl Into<TaskScope>, behaviors: Vec<WorkerBehavior>) -> Self {
        self.scripts
            .lock()
            .insert(scope.into(), behaviors.into_iter().collect());
        self
    }

    pub fn attempts(&self) -> Vec<AttemptRecord> {
        self.attempts.lock().clone()
    }

    pub fn total_attempts(&self) -> usize {
        self.attempts.lock().len()
    }

    pub fn attempt_count(&self, scope: &str) -> usize {
        self.attempts
            .lock()
            .iter()
            .filter(|a| a.scope.as_str() == scope)
            .count()
    }

    pub fn attempt_starts(&self, scope: &str) -> Vec<Instant> {
        self.attempts
            .lock()
            .iter()
            .filter(|a| a.scope.as_str() == scope)
            .map(|a| a.started_at)
            .collect()
    }

    /// Highest number of attempts that were running at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }

    fn next_behavior(&self, scope: &TaskScope) -> WorkerBehavior {
        self.scripts
            .lock()
            .get_mut(scope)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default_behavior.clone())
    }

    fn artifact(&self, scope: &TaskScope) -> ArtifactDescriptor {
        ArtifactDescriptor::new(
            format!("memory://{}/{}", self.source_id, scope),
            1_024,
            Utc::now(),
        )
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    async fn execute(
        &self,
        scope: &TaskScope,
        _deadline: Instant,
        cancel: CancellationToken,
    ) -> Result<ArtifactDescriptor, WorkerError> {
        self.attempts.lock().push(AttemptRecord {
            scope: scope.clone(),
            started_at: Instant::now(),
        });
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(running, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        match self.next_behavior(scope) {
            WorkerBehavior::Succeed => Ok(self.artifact(scope)),
            WorkerBehavior::SucceedAfter(duration) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(WorkerError::Cancelled),
                    _ = tokio::time::sleep(duration) => Ok(self.artifact(scope)),
                }
            }
            WorkerBehavior::Fail(error) => Err(error),
            WorkerBehavior::Hang => {
                cancel.cancelled().await;
                Err(WorkerError::Cancelled)
            }
            WorkerBehavior::Panic(message) => panic!("{message}"),
        }
    }
}
