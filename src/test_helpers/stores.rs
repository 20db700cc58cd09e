// In-memory inventory store and static coverage provider.

use crate::error::{CollectorError, Result};
use crate::models::{ExpectedCoverageEntry, InventorySnapshot, SourceId, TaskScope};
use crate::orchestration::types::{CoverageProvider, InventoryStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Inventory keyed by `(source_id, scope)`; upserts overwrite in place, so
/// repeating one never creates a duplicate entry.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    entries: Mutex<BTreeMap<(SourceId, TaskScope), DateTime<Utc>>>,
    snapshot_fails: AtomicBool,
    upsert_fails: AtomicBool,
    upsert_calls: AtomicUsize,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(
        self,
        source_id: impl Into<SourceId>,
        scope: impl Into<TaskScope>,
        collected_at: DateTime<Utc>,
    ) -> Self {
        self.entries
            .lock()
            .insert((source_id.into(), scope.into()), collected_at);
        self
    }

    pub fn set_snapshot_fails(&self, fails: bool) {
        self.snapshot_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_upsert_fails(&self, fails: bool) {
        self.upsert_fails.store(fails, Ordering::SeqCst);
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn collected_at(&self, source_id: &str, scope: &str) -> Option<DateTime<Utc>> {
        self.entries
            .lock()
            .get(&(SourceId::new(source_id), TaskScope::new(scope)))
            .copied()
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn snapshot(&self) -> Result<InventorySnapshot> {
        if self.snapshot_fails.load(Ordering::SeqCst) {
            return Err(CollectorError::inventory_unavailable("in-memory store offline"));
        }
        let mut snapshot = InventorySnapshot::new(Utc::now());
        for ((source_id, scope), collected_at) in self.entries.lock().iter() {
            snapshot.insert(source_id.clone(), scope.clone(), *collected_at);
        }
        Ok(snapshot)
    }

    async fn upsert(
        &self,
        source_id: &SourceId,
        scope: &TaskScope,
        collected_at: DateTime<Utc>,
    ) -> Result<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if self.upsert_fails.load(Ordering::SeqCst) {
            return Err(CollectorError::inventory_unavailable("in-memory store offline"));
        }
        self.entries
            .lock()
            .insert((source_id.clone(), scope.clone()), collected_at);
        Ok(())
    }
}

/// Fixed coverage model
#[derive(Debug, Default)]
pub struct StaticCoverageProvider {
    entries: Mutex<Vec<ExpectedCoverageEntry>>,
    fails: AtomicBool,
}

impl StaticCoverageProvider {
    pub fn new(entries: Vec<ExpectedCoverageEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            fails: AtomicBool::new(false),
        }
    }

    pub fn set_entries(&self, entries: Vec<ExpectedCoverageEntry>) {
        *self.entries.lock() = entries;
    }

    pub fn set_fails(&self, fails: bool) {
        self.fails.store(fails, Ordering::SeqCst);
    }
}

#[async_trait]
impl CoverageProvider for StaticCoverageProvider {
    async fn coverage(&self) -> Result<Vec<ExpectedCoverageEntry>> {
        if self.fails.load(Ordering::SeqCst) {
            return Err(CollectorError::coverage_unavailable("coverage model offline"));
        }
        Ok(self.entries.lock().clone())
    }
}
