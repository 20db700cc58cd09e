#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Collector Core
//!
//! Autonomous collection orchestrator: a self-healing control loop that keeps
//! an inventory of collected data converging on an expected-coverage model.
//!
//! ## Overview
//!
//! Every cycle the collector compares what has been collected with what
//! should exist, turns each gap into a prioritized task and dispatches the
//! tasks to per-source workers. Each source gets its own rate and
//! concurrency budget; a global pool bounds total work. Failures stay
//! isolated to the task that hit them: transient errors are retried with
//! backoff, permanent ones are abandoned, and neither stops the loop.
//!
//! ## Key Features
//!
//! - **Token-bucket rate limiting**: per source, with burst and concurrency caps
//! - **Deterministic gap detection**: identical inputs give identical tasks
//! - **Priority dispatch**: critical gaps first, blocked sources never stall others
//! - **Supervised execution**: hard timeouts, bounded retries, panic isolation
//! - **Explicit state machines**: for both task lifecycle and the control loop
//! - **Fire-and-forget telemetry**: bounded buffer, drops oldest under pressure
//!
//! ## Module Organization
//!
//! - [`models`] - Tasks, coverage, inventory snapshots and cycle reports
//! - [`resilience`] - Token buckets and the rate governor
//! - [`orchestration`] - Detector, queue, dispatcher, supervisor and loop
//! - [`state_machine`] - Task and loop state machines
//! - [`registry`] - Worker registration
//! - [`events`] - Telemetry events, publisher and sinks
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use collector_core::config::ConfigManager;
//! use collector_core::orchestration::CollectorBootstrap;
//! use collector_core::test_helpers::{InMemoryInventoryStore, ScriptedWorker, StaticCoverageProvider};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! collector_core::logging::init_structured_logging();
//! let manager = ConfigManager::load()?;
//!
//! let system = CollectorBootstrap::from_config_manager(&manager)
//!     .with_worker(Arc::new(ScriptedWorker::new("weather")))
//!     .with_inventory_store(Arc::new(InMemoryInventoryStore::new()))
//!     .with_coverage_provider(Arc::new(StaticCoverageProvider::new(Vec::new())))
//!     .build()?;
//!
//! let report = system.run_cycle().await;
//! println!("cycle {} detected {} gaps", report.cycle_id, report.counts.detected);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod resilience;
pub mod state_machine;
pub mod test_helpers;

pub use config::{CollectorConfig, ConfigManager, ConfigurationError};
pub use error::{CollectorError, Result};
pub use events::{TelemetryEvent, TelemetryPublisher, TelemetrySink};
pub use models::{
    CollectionTask, CycleReport, CycleStatus, ExpectedCoverageEntry, InventorySnapshot, SourceId,
    TaskOutcome, TaskPriority, TaskScope,
};
pub use orchestration::{
    CollectorBootstrap, CollectorSystem, CoverageProvider, InventoryStore, Worker, WorkerError,
};
pub use resilience::{RateGovernor, SourceBudget};
pub use state_machine::{LoopState, TaskState};
