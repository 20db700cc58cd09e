//! # Worker Registry
//!
//! Maps each `source_id` to the [`Worker`] that collects from it.
//!
//! Workers are registered once at bootstrap. Lookups happen on every attempt
//! from many supervisor tasks at once, so the map is a [`DashMap`] and hands
//! out cheap `Arc` clones.

use crate::error::{CollectorError, Result};
use crate::models::SourceId;
use crate::orchestration::types::Worker;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Default)]
pub struct WorkerRegistry {
    workers: DashMap<SourceId, Arc<dyn Worker>>,
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("sources", &self.sources())
            .finish()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `worker` under its own source id, replacing any earlier one
    pub fn register(&self, worker: Arc<dyn Worker>) {
        let source_id = worker.source_id().clone();
        if self.workers.insert(source_id.clone(), worker).is_some() {
            warn!(source_id = %source_id, "🔁 REGISTRY: Replaced existing worker");
        } else {
            info!(source_id = %source_id, "✅ REGISTRY: Registered worker");
        }
    }

    pub fn get(&self, source_id: &SourceId) -> Result<Arc<dyn Worker>> {
        self.workers
            .get(source_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CollectorError::UnknownSource(source_id.clone()))
    }

    pub fn contains(&self, source_id: &SourceId) -> bool {
        self.workers.contains_key(source_id)
    }

    /// Registered source ids, sorted
    pub fn sources(&self) -> Vec<SourceId> {
        let mut sources: Vec<SourceId> = self.workers.iter().map(|e| e.key().clone()).collect();
        sources.sort();
        sources
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
