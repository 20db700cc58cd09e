//! # Data Model
//!
//! Value types shared by every collector component: collection tasks and
//! their identifiers, inventory snapshots and expected coverage, worker
//! artifacts, and the per-cycle report.

pub mod artifact;
pub mod coverage;
pub mod cycle_report;
pub mod task;

pub use artifact::ArtifactDescriptor;
pub use coverage::{ExpectedCoverageEntry, InventorySnapshot};
pub use cycle_report::{
    AbandonReason, CycleReport, CycleStatus, OutcomeCounts, SourceUtilization, TaskOutcome,
    TaskResult,
};
pub use task::{CollectionTask, GapKind, SourceId, TaskId, TaskPriority, TaskScope};
