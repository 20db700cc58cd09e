//! # Collection Orchestration
//!
//! The control loop that turns inventory gaps into completed collections.
//!
//! ## Architecture
//!
//! ```text
//! ReconciliationLoop
//!   ├── InventoryStore + CoverageProvider ─▶ GapDetector ─▶ TaskQueue
//!   ├── Dispatcher ── RateGovernor + global pool ─▶ ExecutionSupervisor ─▶ Worker
//!   └── outcomes ─▶ InventoryStore::upsert, TelemetryPublisher
//! ```
//!
//! ## Core Components
//!
//! - **GapDetector**: pure comparison of a snapshot against expected coverage
//! - **TaskQueue**: bounded, fail-closed priority queue
//! - **Dispatcher**: admits tasks under per-source and global budgets
//! - **ExecutionSupervisor**: timeout, retry and panic isolation per task
//! - **ReconciliationLoop**: the cyclic detect/dispatch/update state machine
//! - **CollectorBootstrap**: validation and wiring of all of the above
//!
//! External collaborators are reached only through the traits in [`types`].

pub mod backoff_calculator;
pub mod bootstrap;
pub mod dispatcher;
pub mod error_classifier;
pub mod errors;
pub mod execution_supervisor;
pub mod gap_detector;
pub mod reconciliation_loop;
pub mod task_queue;
pub mod types;

pub use backoff_calculator::{BackoffCalculator, BackoffResult, BackoffType};
pub use bootstrap::{CollectorBootstrap, CollectorSystem, CollectorSystemHandle, SystemStatus};
pub use dispatcher::{DispatchRun, Dispatcher};
pub use error_classifier::{
    ErrorCategory, ErrorClassification, ErrorClassifier, StandardErrorClassifier,
};
pub use errors::WorkerError;
pub use execution_supervisor::{AttemptCounters, ExecutionSupervisor, OutcomeReporter};
pub use gap_detector::GapDetector;
pub use reconciliation_loop::{ReconciliationLoop, WakeHandle};
pub use task_queue::{PushBatchResult, TaskQueue};
pub use types::{CoverageProvider, InventoryStore, Worker};
