//! Telemetry sinks.
//!
//! The collector emits structured events and never decides how they are
//! presented. A sink receives each event once, on the publisher's forwarding
//! task, so a slow sink delays only other telemetry and never the collector.

use super::types::TelemetryEvent;
use crate::models::TaskResult;
use tracing::{info, warn};

pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: &TelemetryEvent);
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {
    fn record(&self, _event: &TelemetryEvent) {}
}

/// Writes every event as a structured tracing record
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn record(&self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::TaskTerminal { cycle_id, outcome } => match &outcome.result {
                TaskResult::Succeeded { artifact } => info!(
                    event = event.event_name(),
                    cycle_id = %cycle_id,
                    task_id = %outcome.task.task_id,
                    source_id = %outcome.task.source_id,
                    scope = %outcome.task.scope,
                    priority = %outcome.task.priority,
                    attempts = outcome.task.attempt_count,
                    location = %artifact.location,
                    size_bytes = artifact.size_bytes,
                    "📡 TELEMETRY"
                ),
                TaskResult::Abandoned { reason, last_error } => warn!(
                    event = event.event_name(),
                    cycle_id = %cycle_id,
                    task_id = %outcome.task.task_id,
                    source_id = %outcome.task.source_id,
                    scope = %outcome.task.scope,
                    priority = %outcome.task.priority,
                    attempts = outcome.task.attempt_count,
                    reason = %reason,
                    last_error = last_error.as_deref(),
                    "📡 TELEMETRY"
                ),
            },
            TelemetryEvent::QueueRejected {
                cycle_id,
                source_id,
                scope,
                capacity,
            } => warn!(
                event = event.event_name(),
                cycle_id = %cycle_id,
                source_id = %source_id,
                scope = %scope,
                capacity = capacity,
                "📡 TELEMETRY"
            ),
            TelemetryEvent::CycleReport(report) => info!(
                event = event.event_name(),
                cycle_id = %report.cycle_id,
                duration_ms = report.duration.as_millis() as u64,
                detected = report.counts.detected,
                succeeded = report.counts.succeeded,
                abandoned = report.counts.abandoned(),
                unfinished = report.counts.unfinished,
                report = %serde_json::to_string(report).unwrap_or_default(),
                "📡 TELEMETRY"
            ),
        }
    }
}
