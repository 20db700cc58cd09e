//! Shared fixtures for collector integration tests.

#![allow(dead_code)] // Not every test binary uses every fixture

pub mod strategies;

use chrono::{Duration as ChronoDuration, Utc};
use collector_core::models::ExpectedCoverageEntry;
use collector_core::orchestration::{CollectorBootstrap, CollectorSystem};
use collector_core::resilience::SourceBudget;
use collector_core::test_helpers::{
    InMemoryInventoryStore, RecordingTelemetrySink, ScriptedWorker, StaticCoverageProvider,
};
use collector_core::CollectorConfig;
use std::sync::Arc;
use std::time::Duration;

/// Config with roomy cadence settings and deterministic backoff
pub fn base_config() -> CollectorConfig {
    let mut config = CollectorConfig::default();
    config.execution.global_pool_size = 8;
    config.execution.worker_timeout_ms = 5_000;
    config.execution.max_retries = 2;
    config.execution.shutdown_grace_ms = 1_000;
    config.backoff.base_delay_ms = 100;
    config.backoff.max_delay_ms = 1_000;
    config.backoff.jitter_enabled = false;
    config.reconciliation.cycle_interval_ms = 60_000;
    config.reconciliation.cycle_deadline_ms = 30_000;
    config.reconciliation.systemic_retry_base_ms = 1_000;
    config.reconciliation.systemic_retry_max_ms = 10_000;
    config
}

/// One coverage entry per scope, expected since yesterday with a one hour
/// freshness window
pub fn coverage_for(source: &str, scopes: &[&str]) -> Vec<ExpectedCoverageEntry> {
    scopes
        .iter()
        .map(|scope| {
            ExpectedCoverageEntry::new(
                source,
                *scope,
                Duration::from_secs(3_600),
                Utc::now() - ChronoDuration::days(1),
            )
        })
        .collect()
}

pub fn day_scopes(count: usize) -> Vec<String> {
    (1..=count).map(|day| format!("day-{day}")).collect()
}

/// A fully wired collector with in-memory collaborators
pub struct TestCollector {
    pub system: CollectorSystem,
    pub inventory: Arc<InMemoryInventoryStore>,
    pub coverage: Arc<StaticCoverageProvider>,
    pub telemetry: Arc<RecordingTelemetrySink>,
}

pub struct TestCollectorBuilder {
    config: CollectorConfig,
    workers: Vec<Arc<ScriptedWorker>>,
    coverage: Vec<ExpectedCoverageEntry>,
}

impl TestCollectorBuilder {
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            config,
            workers: Vec::new(),
            coverage: Vec::new(),
        }
    }

    pub fn with_source(
        mut self,
        worker: Arc<ScriptedWorker>,
        budget: SourceBudget,
        scopes: &[&str],
    ) -> Self {
        let source = worker_source(&worker);
        self.config = self.config.with_source(source.clone(), budget);
        self.coverage.extend(coverage_for(&source, scopes));
        self.workers.push(worker);
        self
    }

    pub fn build(self) -> TestCollector {
        let inventory = Arc::new(InMemoryInventoryStore::new());
        let coverage = Arc::new(StaticCoverageProvider::new(self.coverage));
        let telemetry = Arc::new(RecordingTelemetrySink::new());

        let mut bootstrap = CollectorBootstrap::new(self.config)
            .with_inventory_store(inventory.clone())
            .with_coverage_provider(coverage.clone())
            .with_telemetry_sink(telemetry.clone());
        for worker in self.workers {
            bootstrap = bootstrap.with_worker(worker);
        }

        TestCollector {
            system: bootstrap.build().expect("test collector should build"),
            inventory,
            coverage,
            telemetry,
        }
    }
}

fn worker_source(worker: &ScriptedWorker) -> String {
    use collector_core::Worker;
    worker.source_id().as_str().to_string()
}

/// Let the telemetry forwarder drain what has been published so far
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
