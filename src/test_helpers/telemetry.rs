// Recording telemetry sink - keeps every event for assertions.

use crate::events::{TelemetryEvent, TelemetrySink};
use crate::models::CycleReport;
use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct RecordingTelemetrySink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events with the given event name
    pub fn count(&self, event_name: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_name() == event_name)
            .count()
    }

    pub fn cycle_reports(&self) -> Vec<CycleReport> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                TelemetryEvent::CycleReport(report) => Some(report.clone()),
                _ => None,
            })
            .collect()
    }
}

impl TelemetrySink for RecordingTelemetrySink {
    fn record(&self, event: &TelemetryEvent) {
        self.events.lock().push(event.clone());
    }
}
