//! # Registry Infrastructure
//!
//! Lookup tables populated at bootstrap and read on the hot path.
//!
//! - **WorkerRegistry**: `source_id` to the worker that collects it

pub mod worker_registry;

pub use worker_registry::WorkerRegistry;
