//! # Task Queue
//!
//! Bounded priority queue of collection tasks.
//!
//! Ordering is strict by priority class; within a class the oldest
//! `created_at` goes first, and insertion order breaks the remaining ties.
//! The queue fails closed: once `max_capacity` tasks are queued, further
//! pushes are rejected and existing work is never evicted.

use crate::error::{CollectorError, Result};
use crate::models::CollectionTask;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::warn;

struct QueuedTask {
    task: CollectionTask,
    /// Monotonic sequence counter for FIFO ordering within equal keys
    sequence: u64,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the greatest element, so every key is reversed:
        // most urgent class, then oldest created_at, then lowest sequence
        other
            .task
            .priority
            .cmp(&self.task.priority)
            .then_with(|| other.task.created_at.cmp(&self.task.created_at))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct QueueState {
    heap: BinaryHeap<QueuedTask>,
    next_sequence: u64,
}

/// Outcome of pushing a batch
#[derive(Debug, Default)]
pub struct PushBatchResult {
    pub accepted: usize,
    /// Tasks refused at capacity, handed back to the caller
    pub rejected: Vec<CollectionTask>,
}

pub struct TaskQueue {
    state: Mutex<QueueState>,
    max_capacity: usize,
    pushed: Notify,
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("len", &self.len())
            .field("max_capacity", &self.max_capacity)
            .finish()
    }
}

impl TaskQueue {
    pub fn new(max_capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_sequence: 0,
            }),
            max_capacity,
            pushed: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn push(&self, task: CollectionTask) -> Result<()> {
        self.try_push(task).map_err(|rejected| {
            warn!(
                task_id = %rejected.task_id,
                source_id = %rejected.source_id,
                capacity = self.max_capacity,
                "⚠️ QUEUE: At capacity, rejecting task"
            );
            CollectorError::QueueCapacityExceeded {
                capacity: self.max_capacity,
            }
        })
    }

    /// Push every task that fits; the rest come back in the result
    pub fn push_batch(&self, tasks: impl IntoIterator<Item = CollectionTask>) -> PushBatchResult {
        let mut result = PushBatchResult::default();
        for task in tasks {
            match self.try_push(task) {
                Ok(()) => result.accepted += 1,
                Err(rejected) => result.rejected.push(rejected),
            }
        }

        if !result.rejected.is_empty() {
            warn!(
                accepted = result.accepted,
                rejected = result.rejected.len(),
                capacity = self.max_capacity,
                "⚠️ QUEUE: Batch exceeded capacity"
            );
        }
        result
    }

    fn try_push(&self, task: CollectionTask) -> std::result::Result<(), CollectionTask> {
        {
            let mut state = self.state.lock();
            if state.heap.len() >= self.max_capacity {
                return Err(task);
            }
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.heap.push(QueuedTask { task, sequence });
        }
        self.pushed.notify_waiters();
        Ok(())
    }

    /// Remove and return the most urgent task. Each task is handed out once.
    pub fn pop(&self) -> Option<CollectionTask> {
        self.state.lock().heap.pop().map(|queued| queued.task)
    }

    /// Remove every queued task, most urgent first
    pub fn drain(&self) -> Vec<CollectionTask> {
        let heap = std::mem::take(&mut self.state.lock().heap);
        heap.into_sorted_vec()
            .into_iter()
            .rev()
            .map(|queued| queued.task)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Future resolved by the next push. Call `enable()` on it before checking
    /// the queue to avoid missing a push in between.
    pub fn notified(&self) -> Notified<'_> {
        self.pushed.notified()
    }
}
