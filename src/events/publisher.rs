use super::sink::TelemetrySink;
use super::types::TelemetryEvent;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Fire-and-forget telemetry publisher.
///
/// Events go into a bounded broadcast buffer; when the sink falls behind, the
/// oldest buffered events are overwritten and counted as dropped. Publishing
/// never waits.
#[derive(Debug, Clone)]
pub struct TelemetryPublisher {
    sender: Option<broadcast::Sender<TelemetryEvent>>,
    /// Receiver created with the channel so nothing published before the
    /// forwarder starts is lost
    pending_receiver: Arc<Mutex<Option<broadcast::Receiver<TelemetryEvent>>>>,
    published: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl TelemetryPublisher {
    pub fn new(buffer_size: usize) -> Self {
        let (sender, receiver) = broadcast::channel(buffer_size.max(1));
        Self {
            sender: Some(sender),
            pending_receiver: Arc::new(Mutex::new(Some(receiver))),
            published: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A publisher that discards everything
    pub fn disabled() -> Self {
        Self {
            sender: None,
            pending_receiver: Arc::new(Mutex::new(None)),
            published: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn publish(&self, event: TelemetryEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        // No receiver means the forwarder is gone; telemetry is best-effort
        if sender.send(event).is_ok() {
            self.published.fetch_add(1, Ordering::Relaxed);
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Start delivering events to `sink`. Only the first call starts a
    /// forwarder; later calls return `None`.
    pub fn spawn_forwarder(&self, sink: Arc<dyn TelemetrySink>) -> Option<JoinHandle<()>> {
        let mut receiver = self.pending_receiver.lock().take()?;
        let dropped = Arc::clone(&self.dropped);

        Some(tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => sink.record(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        dropped.fetch_add(skipped, Ordering::Relaxed);
                        warn!(skipped, "📡 TELEMETRY: Sink lagging, dropped oldest events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("📡 TELEMETRY: Publisher closed, forwarder exiting");
                        break;
                    }
                }
            }
        }))
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    pub fn published_events(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Events lost to buffer overflow or a missing forwarder
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for TelemetryPublisher {
    fn default() -> Self {
        Self::new(crate::constants::defaults::TELEMETRY_BUFFER_SIZE)
    }
}
