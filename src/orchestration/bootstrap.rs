//! # Collector Bootstrap
//!
//! Validates configuration against the registered workers and assembles the
//! collector: governor, queue, supervisor, reconciliation loop and telemetry.
//!
//! ## Key Features
//!
//! - **Fail fast**: every configuration problem surfaces here as a
//!   [`CollectorError::Configuration`], before any cycle runs
//! - **Source parity**: every budgeted source needs a worker and every worker
//!   a budget, so an unknown source can never reach the governor at runtime
//! - **Lifecycle management**: [`CollectorSystem::start`] returns a handle with
//!   stop and status operations
//!
//! ## Usage
//!
//! ```rust,no_run
//! use collector_core::config::CollectorConfig;
//! use collector_core::orchestration::CollectorBootstrap;
//! use collector_core::resilience::SourceBudget;
//! use collector_core::test_helpers::{InMemoryInventoryStore, ScriptedWorker, StaticCoverageProvider};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CollectorConfig::default().with_source("weather", SourceBudget::new(5.0, 5, 2));
//! let system = CollectorBootstrap::new(config)
//!     .with_worker(Arc::new(ScriptedWorker::new("weather")))
//!     .with_inventory_store(Arc::new(InMemoryInventoryStore::new()))
//!     .with_coverage_provider(Arc::new(StaticCoverageProvider::new(Vec::new())))
//!     .build()?;
//!
//! let mut handle = system.start();
//! handle.stop().await;
//! # Ok(())
//! # }
//! ```

use super::error_classifier::ErrorClassifier;
use super::execution_supervisor::ExecutionSupervisor;
use super::reconciliation_loop::{ReconciliationLoop, WakeHandle};
use super::task_queue::TaskQueue;
use super::types::{CoverageProvider, InventoryStore, Worker};
use crate::config::{CollectorConfig, ConfigManager, ConfigurationError};
use crate::error::Result;
use crate::events::{TelemetryPublisher, TelemetrySink, TracingTelemetrySink};
use crate::models::{CycleReport, SourceId};
use crate::registry::WorkerRegistry;
use crate::resilience::RateGovernor;
use crate::state_machine::LoopState;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Collaborators and policy overrides for one collector instance
pub struct CollectorBootstrap {
    config: CollectorConfig,
    workers: Vec<Arc<dyn Worker>>,
    inventory: Option<Arc<dyn InventoryStore>>,
    coverage: Option<Arc<dyn CoverageProvider>>,
    sink: Option<Arc<dyn TelemetrySink>>,
    classifier: Option<Arc<dyn ErrorClassifier>>,
}

impl CollectorBootstrap {
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            config,
            workers: Vec::new(),
            inventory: None,
            coverage: None,
            sink: None,
            classifier: None,
        }
    }

    pub fn from_config_manager(config_manager: &ConfigManager) -> Self {
        Self::new(config_manager.config().clone())
    }

    pub fn with_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.workers.push(worker);
        self
    }

    pub fn with_inventory_store(mut self, inventory: Arc<dyn InventoryStore>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn with_coverage_provider(mut self, coverage: Arc<dyn CoverageProvider>) -> Self {
        self.coverage = Some(coverage);
        self
    }

    /// Defaults to [`TracingTelemetrySink`]
    pub fn with_telemetry_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_error_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Validate and wire everything. Must be called inside a tokio runtime
    /// when telemetry is enabled, since the telemetry forwarder is spawned.
    pub fn build(self) -> Result<CollectorSystem> {
        self.config.validate()?;

        let inventory = self.inventory.ok_or_else(|| {
            ConfigurationError::missing_required_field("inventory_store", "collector bootstrap")
        })?;
        let coverage = self.coverage.ok_or_else(|| {
            ConfigurationError::missing_required_field("coverage_provider", "collector bootstrap")
        })?;

        let registry = Arc::new(WorkerRegistry::new());
        for worker in self.workers {
            registry.register(worker);
        }
        check_source_parity(&self.config, &registry)?;

        let governor = Arc::new(RateGovernor::new(
            self.config
                .sources
                .iter()
                .map(|(source, budget)| (SourceId::new(source.as_str()), *budget)),
        )?);

        let telemetry = if self.config.telemetry.enabled {
            TelemetryPublisher::new(self.config.telemetry.buffer_size)
        } else {
            TelemetryPublisher::disabled()
        };
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(TracingTelemetrySink));
        let forwarder = telemetry.spawn_forwarder(sink);

        let mut supervisor = ExecutionSupervisor::new(
            &self.config,
            Arc::clone(&governor),
            Arc::clone(&registry),
            telemetry.clone(),
        );
        if let Some(classifier) = self.classifier {
            supervisor = supervisor.with_classifier(classifier);
        }
        let supervisor = Arc::new(supervisor);

        let queue = Arc::new(TaskQueue::new(self.config.queue.max_capacity));
        let reconciliation = Arc::new(ReconciliationLoop::new(
            &self.config,
            inventory,
            coverage,
            Arc::clone(&queue),
            Arc::clone(&governor),
            supervisor,
            telemetry.clone(),
        ));

        info!(
            sources = registry.len(),
            global_pool_size = self.config.execution.global_pool_size,
            queue_capacity = self.config.queue.max_capacity,
            telemetry_enabled = telemetry.is_enabled(),
            "✅ BOOTSTRAP: Collector assembled"
        );

        Ok(CollectorSystem {
            config: Arc::new(self.config),
            governor,
            queue,
            registry,
            reconciliation,
            telemetry,
            forwarder,
        })
    }
}

fn check_source_parity(config: &CollectorConfig, registry: &WorkerRegistry) -> Result<()> {
    let budgeted: BTreeSet<SourceId> = config
        .sources
        .keys()
        .map(|source| SourceId::new(source.as_str()))
        .collect();
    let registered: BTreeSet<SourceId> = registry.sources().into_iter().collect();

    if let Some(source) = budgeted.difference(&registered).next() {
        return Err(ConfigurationError::invalid_value(
            format!("sources.{source}"),
            source.to_string(),
            "source has a budget but no registered worker",
        )
        .into());
    }
    if let Some(source) = registered.difference(&budgeted).next() {
        return Err(ConfigurationError::invalid_value(
            format!("sources.{source}"),
            source.to_string(),
            "worker registered for a source without a budget",
        )
        .into());
    }
    Ok(())
}

/// A fully assembled collector
pub struct CollectorSystem {
    config: Arc<CollectorConfig>,
    governor: Arc<RateGovernor>,
    queue: Arc<TaskQueue>,
    registry: Arc<WorkerRegistry>,
    reconciliation: Arc<ReconciliationLoop>,
    telemetry: TelemetryPublisher,
    forwarder: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for CollectorSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorSystem")
            .field("sources", &self.registry.sources())
            .field("state", &self.reconciliation.state())
            .finish()
    }
}

impl CollectorSystem {
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn telemetry(&self) -> &TelemetryPublisher {
        &self.telemetry
    }

    pub fn reconciliation(&self) -> &Arc<ReconciliationLoop> {
        &self.reconciliation
    }

    pub fn state(&self) -> LoopState {
        self.reconciliation.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LoopState> {
        self.reconciliation.subscribe_state()
    }

    pub fn wake_handle(&self) -> WakeHandle {
        self.reconciliation.wake_handle()
    }

    /// Run a single cycle in the caller's task, after any cycle the spawned
    /// loop has in progress
    pub async fn run_cycle(&self) -> CycleReport {
        self.reconciliation.run_cycle().await
    }

    /// Spawn the reconciliation loop
    pub fn start(self) -> CollectorSystemHandle {
        let shutdown = CancellationToken::new();
        let reconciliation = Arc::clone(&self.reconciliation);
        let token = shutdown.clone();
        let loop_handle = tokio::spawn(async move { reconciliation.run(token).await });

        info!("🚀 BOOTSTRAP: Collector started");
        CollectorSystemHandle {
            system: self,
            shutdown,
            loop_handle: Some(loop_handle),
        }
    }
}

/// Handle for a running collector
pub struct CollectorSystemHandle {
    system: CollectorSystem,
    shutdown: CancellationToken,
    loop_handle: Option<JoinHandle<()>>,
}

impl CollectorSystemHandle {
    pub fn system(&self) -> &CollectorSystem {
        &self.system
    }

    pub fn is_running(&self) -> bool {
        self.loop_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn wake(&self) {
        self.system.wake_handle().wake();
    }

    /// Request shutdown and wait for the loop to drain and exit
    pub async fn stop(&mut self) {
        let Some(handle) = self.loop_handle.take() else {
            warn!("Collector already stopped");
            return;
        };
        info!("🛑 BOOTSTRAP: Collector shutdown requested");
        self.shutdown.cancel();
        if let Err(error) = handle.await {
            warn!(error = %error, "reconciliation loop ended abnormally");
        }
    }

    pub fn status(&self) -> SystemStatus {
        let system = &self.system;
        SystemStatus {
            running: self.is_running(),
            state: system.state(),
            consecutive_failures: system.reconciliation.consecutive_failures(),
            sources: system.registry.sources(),
            in_flight: system.governor.total_in_flight(),
            queued: system.queue.len(),
            telemetry_published: system.telemetry.published_events(),
            telemetry_dropped: system.telemetry.dropped_events(),
            telemetry_forwarding: system
                .forwarder
                .as_ref()
                .is_some_and(|handle| !handle.is_finished()),
        }
    }
}

/// System status information
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub running: bool,
    pub state: LoopState,
    pub consecutive_failures: u32,
    pub sources: Vec<SourceId>,
    pub in_flight: usize,
    pub queued: usize,
    pub telemetry_published: u64,
    pub telemetry_dropped: u64,
    pub telemetry_forwarding: bool,
}
