//! # Gap Detector
//!
//! Reconciles an inventory snapshot against the expected-coverage model and
//! emits one collection task per gap.
//!
//! ## Overview
//!
//! Detection is a pure function of its two inputs. The reference time is the
//! snapshot's `taken_at` (never the wall clock), and every emitted task is
//! stamped with that same instant, so identical inputs always produce
//! identical tasks, priorities and ordering.
//!
//! ## Priority Rules
//!
//! | Gap                        | expected within critical window | older    |
//! |----------------------------|---------------------------------|----------|
//! | Missing (never collected)  | Critical                        | Low      |
//! | Stale (collected, too old) | High                            | Medium   |
//!
//! An entry with *any* collected copy is Stale, never Missing, even when it
//! is historical. A collection timestamp later than the snapshot (clock skew
//! between writers) counts as fresh.
//!
//! ## Ordering
//!
//! Priority class, then `expected_since` oldest first, then source id and
//! scope. Duplicate coverage entries for one `(source_id, scope)` collapse into
//! a single task using the strictest freshness and the earliest
//! `expected_since`.

use crate::config::GapDetectionConfig;
use crate::models::{
    CollectionTask, ExpectedCoverageEntry, GapKind, InventorySnapshot, SourceId, TaskPriority,
    TaskScope,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct GapDetector {
    critical_window: Duration,
}

impl Default for GapDetector {
    fn default() -> Self {
        Self::new(&GapDetectionConfig::default())
    }
}

impl GapDetector {
    pub fn new(config: &GapDetectionConfig) -> Self {
        Self {
            critical_window: config.critical_window(),
        }
    }

    pub fn with_critical_window(critical_window: Duration) -> Self {
        Self { critical_window }
    }

    pub fn critical_window(&self) -> Duration {
        self.critical_window
    }

    pub fn detect(
        &self,
        snapshot: &InventorySnapshot,
        expected_coverage: &[ExpectedCoverageEntry],
    ) -> Vec<CollectionTask> {
        let now = snapshot.taken_at;
        let mut expected: BTreeMap<(&SourceId, &TaskScope), (Duration, DateTime<Utc>)> =
            BTreeMap::new();

        for entry in expected_coverage {
            expected
                .entry((&entry.source_id, &entry.scope))
                .and_modify(|(freshness, since)| {
                    *freshness = (*freshness).min(entry.expected_freshness);
                    *since = (*since).min(entry.expected_since);
                })
                .or_insert((entry.expected_freshness, entry.expected_since));
        }

        let mut tasks: Vec<CollectionTask> = expected
            .into_iter()
            .filter_map(|((source_id, scope), (freshness, expected_since))| {
                let gap_kind = self.classify_gap(snapshot, source_id, scope, freshness)?;
                let priority = self.assign_priority(gap_kind, now, expected_since);
                Some(CollectionTask::new(
                    source_id.clone(),
                    scope.clone(),
                    priority,
                    gap_kind,
                    expected_since,
                    now,
                ))
            })
            .collect();

        // Stable sort keeps the (source, scope) order from the BTreeMap
        tasks.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.expected_since.cmp(&b.expected_since))
        });

        debug!(
            expected = expected_coverage.len(),
            inventory = snapshot.len(),
            gaps = tasks.len(),
            critical = tasks
                .iter()
                .filter(|t| t.priority == TaskPriority::Critical)
                .count(),
            "gap detection complete"
        );

        tasks
    }

    fn classify_gap(
        &self,
        snapshot: &InventorySnapshot,
        source_id: &SourceId,
        scope: &TaskScope,
        freshness: Duration,
    ) -> Option<GapKind> {
        let Some(collected_at) = snapshot.collected_at(source_id, scope) else {
            return Some(GapKind::Missing);
        };

        // Negative age (collected "after" the snapshot) fails to_std and is fresh
        match snapshot.taken_at.signed_duration_since(collected_at).to_std() {
            Ok(age) if age > freshness => Some(GapKind::Stale),
            _ => None,
        }
    }

    fn assign_priority(
        &self,
        gap_kind: GapKind,
        now: DateTime<Utc>,
        expected_since: DateTime<Utc>,
    ) -> TaskPriority {
        let recent = match now.signed_duration_since(expected_since).to_std() {
            Ok(age) => age <= self.critical_window,
            Err(_) => true,
        };

        match (gap_kind, recent) {
            (GapKind::Missing, true) => TaskPriority::Critical,
            (GapKind::Stale, true) => TaskPriority::High,
            (GapKind::Stale, false) => TaskPriority::Medium,
            (GapKind::Missing, false) => TaskPriority::Low,
        }
    }
}
