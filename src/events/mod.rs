//! # Telemetry
//!
//! Structured events for every terminal task and every cycle, delivered to a
//! [`TelemetrySink`] through a bounded, drop-oldest [`TelemetryPublisher`].

pub mod publisher;
pub mod sink;
pub mod types;

pub use publisher::TelemetryPublisher;
pub use sink::{NullTelemetrySink, TelemetrySink, TracingTelemetrySink};
pub use types::TelemetryEvent;
