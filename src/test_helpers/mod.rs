// Test Helpers Module - In-Memory Collaborators
//
// Reference implementations of the collector's external interfaces for unit
// and integration tests: a scripted worker, an in-memory inventory store, a
// static coverage provider and a telemetry sink that records every event.

pub mod stores;
pub mod telemetry;
pub mod workers;

pub use stores::{InMemoryInventoryStore, StaticCoverageProvider};
pub use telemetry::RecordingTelemetrySink;
pub use workers::{ScriptedWorker, WorkerBehavior};
