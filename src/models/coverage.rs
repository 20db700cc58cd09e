//! Inventory snapshots and the expected-coverage model the gap detector
//! reconciles against each other.

use super::task::{SourceId, TaskScope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One thing that is expected to exist in the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedCoverageEntry {
    pub source_id: SourceId,
    pub scope: TaskScope,
    /// Maximum acceptable age of the collected copy
    pub expected_freshness: Duration,
    /// When the data became expected to exist (publication date, period end)
    pub expected_since: DateTime<Utc>,
}

impl ExpectedCoverageEntry {
    pub fn new(
        source_id: impl Into<SourceId>,
        scope: impl Into<TaskScope>,
        expected_freshness: Duration,
        expected_since: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            scope: scope.into(),
            expected_freshness,
            expected_since,
        }
    }
}

/// Read-only view of the inventory, consistent only as of `taken_at`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventorySnapshot {
    pub taken_at: DateTime<Utc>,
    entries: BTreeMap<(SourceId, TaskScope), DateTime<Utc>>,
}

impl InventorySnapshot {
    pub fn new(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            entries: BTreeMap::new(),
        }
    }

    pub fn with_entry(
        mut self,
        source_id: impl Into<SourceId>,
        scope: impl Into<TaskScope>,
        collected_at: DateTime<Utc>,
    ) -> Self {
        self.insert(source_id.into(), scope.into(), collected_at);
        self
    }

    /// Keeps the most recent collection time per key
    pub fn insert(&mut self, source_id: SourceId, scope: TaskScope, collected_at: DateTime<Utc>) {
        self.entries
            .entry((source_id, scope))
            .and_modify(|existing| {
                if collected_at > *existing {
                    *existing = collected_at;
                }
            })
            .or_insert(collected_at);
    }

    pub fn collected_at(&self, source_id: &SourceId, scope: &TaskScope) -> Option<DateTime<Utc>> {
        self.entries
            .get(&(source_id.clone(), scope.clone()))
            .copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SourceId, &TaskScope, DateTime<Utc>)> {
        self.entries
            .iter()
            .map(|((source, scope), collected_at)| (source, scope, *collected_at))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_snapshot_keeps_latest_collection() {
        let now = Utc::now();
        let older = now - ChronoDuration::hours(3);

        let snapshot = InventorySnapshot::new(now)
            .with_entry("weather", "2024-01-01", older)
            .with_entry("weather", "2024-01-01", now)
            .with_entry("weather", "2024-01-01", older);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot.collected_at(&SourceId::new("weather"), &TaskScope::new("2024-01-01")),
            Some(now)
        );
        assert_eq!(
            snapshot.collected_at(&SourceId::new("weather"), &TaskScope::new("2024-01-02")),
            None
        );
    }
}
