//! # Rate Governor
//!
//! Single owner of every source's rate and concurrency state.
//!
//! ## Overview
//!
//! Each registered source gets a gate holding a [`TokenBucket`] and an
//! in-flight counter behind its own mutex. Callers never see the counters;
//! they ask for admission and receive either a [`SourcePermit`] or a
//! [`WouldBlock`] describing what to wait for.
//!
//! ## Key Features
//!
//! - **Non-blocking admission**: [`RateGovernor::acquire`] returns immediately
//! - **All-or-nothing**: a denied call consumes neither a token nor a slot
//! - **Guaranteed release**: permits give their slot back on drop, including
//!   unwinding and cancellation paths
//! - **Release notifications**: waiters park on a [`Notify`] instead of polling
//!
//! ## Usage
//!
//! ```rust,no_run
//! use collector_core::models::SourceId;
//! use collector_core::resilience::{Admission, RateGovernor, SourceBudget};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let governor = RateGovernor::new([(SourceId::new("weather"), SourceBudget::new(1.0, 1, 1))])?;
//! match governor.acquire(&SourceId::new("weather"))? {
//!     Admission::Granted(permit) => governor.release(permit),
//!     Admission::WouldBlock(reason) => println!("blocked: {reason:?}"),
//! }
//! # Ok(())
//! # }
//! ```

use super::config::SourceBudget;
use super::token_bucket::TokenBucket;
use crate::error::{CollectorError, Result};
use crate::models::SourceId;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Why an admission was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WouldBlock {
    /// The token bucket is empty; a token will be available after `wait`
    RateLimited { wait: Duration },
    /// `max_concurrent` slots are already held
    ConcurrencyCapped,
}

#[derive(Debug)]
pub enum Admission {
    Granted(SourcePermit),
    WouldBlock(WouldBlock),
}

#[derive(Debug)]
struct GateState {
    bucket: TokenBucket,
    in_flight: usize,
    peak_in_flight: usize,
    granted: u64,
    denied_rate_limited: u64,
    denied_concurrency: u64,
}

#[derive(Debug)]
struct SourceGate {
    source_id: SourceId,
    budget: SourceBudget,
    state: Mutex<GateState>,
    slot_released: Notify,
}

impl SourceGate {
    fn release_slot(&self) {
        {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            trace!(
                source_id = %self.source_id,
                in_flight = state.in_flight,
                "slot released"
            );
        }
        self.slot_released.notify_waiters();
    }
}

/// Concurrency slot held for one worker attempt.
///
/// Dropping the permit returns the slot, so release happens on every exit
/// path of the holder.
#[derive(Debug)]
pub struct SourcePermit {
    gate: Arc<SourceGate>,
    any_released: Arc<Notify>,
}

impl SourcePermit {
    pub fn source_id(&self) -> &SourceId {
        &self.gate.source_id
    }
}

impl Drop for SourcePermit {
    fn drop(&mut self) {
        self.gate.release_slot();
        self.any_released.notify_waiters();
    }
}

/// Point-in-time view of one source gate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceGateSnapshot {
    pub source_id: SourceId,
    pub budget: SourceBudget,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub available_tokens: f64,
    pub granted: u64,
    pub denied_rate_limited: u64,
    pub denied_concurrency: u64,
}

#[derive(Debug)]
pub struct RateGovernor {
    gates: HashMap<SourceId, Arc<SourceGate>>,
    any_released: Arc<Notify>,
}

impl RateGovernor {
    /// Register every source up front. An invalid budget is a configuration
    /// error; sources cannot be added later.
    pub fn new(budgets: impl IntoIterator<Item = (SourceId, SourceBudget)>) -> Result<Self> {
        let now = Instant::now();
        let mut gates = HashMap::new();

        for (source_id, budget) in budgets {
            budget.validate(source_id.as_str())?;
            let gate = SourceGate {
                source_id: source_id.clone(),
                budget,
                state: Mutex::new(GateState {
                    bucket: TokenBucket::new(budget.rate_per_second, budget.burst_capacity, now),
                    in_flight: 0,
                    peak_in_flight: 0,
                    granted: 0,
                    denied_rate_limited: 0,
                    denied_concurrency: 0,
                }),
                slot_released: Notify::new(),
            };
            gates.insert(source_id, Arc::new(gate));
        }

        info!(sources = gates.len(), "🚦 GOVERNOR: Rate governor initialized");

        Ok(Self {
            gates,
            any_released: Arc::new(Notify::new()),
        })
    }

    pub fn is_registered(&self, source_id: &SourceId) -> bool {
        self.gates.contains_key(source_id)
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceId> {
        self.gates.keys()
    }

    pub fn budget(&self, source_id: &SourceId) -> Result<SourceBudget> {
        Ok(self.gate(source_id)?.budget)
    }

    /// Try to admit one attempt for `source_id` without waiting.
    ///
    /// The slot check runs before the token check so a capped source never
    /// burns tokens it cannot use.
    pub fn acquire(&self, source_id: &SourceId) -> Result<Admission> {
        let gate = self.gate(source_id)?;
        let mut state = gate.state.lock();

        if state.in_flight >= gate.budget.max_concurrent {
            state.denied_concurrency += 1;
            return Ok(Admission::WouldBlock(WouldBlock::ConcurrencyCapped));
        }

        if let Err(wait) = state.bucket.try_acquire(Instant::now()) {
            state.denied_rate_limited += 1;
            return Ok(Admission::WouldBlock(WouldBlock::RateLimited { wait }));
        }

        state.in_flight += 1;
        state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
        state.granted += 1;
        trace!(
            source_id = %source_id,
            in_flight = state.in_flight,
            "admission granted"
        );
        drop(state);

        Ok(Admission::Granted(SourcePermit {
            gate: Arc::clone(gate),
            any_released: Arc::clone(&self.any_released),
        }))
    }

    /// Return a concurrency slot. Equivalent to dropping the permit.
    pub fn release(&self, permit: SourcePermit) {
        drop(permit);
    }

    /// Wait cooperatively until a permit is granted. Returns `None` if
    /// `cancel` fires first.
    pub async fn acquire_waiting(
        &self,
        source_id: &SourceId,
        cancel: &CancellationToken,
    ) -> Result<Option<SourcePermit>> {
        let gate = Arc::clone(self.gate(source_id)?);

        loop {
            // Registered before the check so a release in between is not missed
            let notified = gate.slot_released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.acquire(source_id)? {
                Admission::Granted(permit) => return Ok(Some(permit)),
                Admission::WouldBlock(WouldBlock::RateLimited { wait }) => {
                    debug!(source_id = %source_id, wait_ms = wait.as_millis() as u64, "rate limited, waiting");
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                Admission::WouldBlock(WouldBlock::ConcurrencyCapped) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(None),
                        _ = &mut notified => {}
                    }
                }
            }
        }
    }

    /// Notified whenever any source releases a slot
    pub fn slot_released_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.any_released)
    }

    /// Resolves on the next slot release from any source
    pub async fn wait_for_release(&self) {
        self.any_released.notified().await;
    }

    pub fn in_flight(&self, source_id: &SourceId) -> Result<usize> {
        Ok(self.gate(source_id)?.state.lock().in_flight)
    }

    pub fn total_in_flight(&self) -> usize {
        self.gates.values().map(|gate| gate.state.lock().in_flight).sum()
    }

    /// Restart peak tracking from the current in-flight count
    pub fn reset_peaks(&self) {
        for gate in self.gates.values() {
            let mut state = gate.state.lock();
            state.peak_in_flight = state.in_flight;
        }
    }

    /// Snapshot of every gate, sorted by source id
    pub fn snapshot(&self) -> Vec<SourceGateSnapshot> {
        let now = Instant::now();
        let mut snapshots: Vec<SourceGateSnapshot> = self
            .gates
            .values()
            .map(|gate| {
                let mut state = gate.state.lock();
                SourceGateSnapshot {
                    source_id: gate.source_id.clone(),
                    budget: gate.budget,
                    in_flight: state.in_flight,
                    peak_in_flight: state.peak_in_flight,
                    available_tokens: state.bucket.available_tokens(now),
                    granted: state.granted,
                    denied_rate_limited: state.denied_rate_limited,
                    denied_concurrency: state.denied_concurrency,
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        snapshots
    }

    fn gate(&self, source_id: &SourceId) -> Result<&Arc<SourceGate>> {
        self.gates
            .get(source_id)
            .ok_or_else(|| CollectorError::UnknownSource(source_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor(rate: f64, burst: u32, max_concurrent: usize) -> RateGovernor {
        RateGovernor::new([(
            SourceId::new("weather"),
            SourceBudget::new(rate, burst, max_concurrent),
        )])
        .unwrap()
    }

    fn weather() -> SourceId {
        SourceId::new("weather")
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_source_is_an_error() {
        let governor = governor(1.0, 1, 1);
        let err = governor.acquire(&SourceId::new("ghost")).unwrap_err();
        assert!(matches!(err, CollectorError::UnknownSource(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_invalid_budget_is_rejected_at_construction() {
        let result = RateGovernor::new([(weather(), SourceBudget::new(1.0, 1, 0))]);
        assert!(matches!(result, Err(CollectorError::Configuration(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap_does_not_consume_tokens() {
        let governor = governor(100.0, 5, 1);

        let permit = match governor.acquire(&weather()).unwrap() {
            Admission::Granted(permit) => permit,
            other => panic!("expected grant, got {other:?}"),
        };
        assert!(matches!(
            governor.acquire(&weather()).unwrap(),
            Admission::WouldBlock(WouldBlock::ConcurrencyCapped)
        ));
        assert!(matches!(
            governor.acquire(&weather()).unwrap(),
            Admission::WouldBlock(WouldBlock::ConcurrencyCapped)
        ));

        governor.release(permit);
        assert_eq!(governor.in_flight(&weather()).unwrap(), 0);

        let snapshot = &governor.snapshot()[0];
        assert_eq!(snapshot.granted, 1);
        assert_eq!(snapshot.denied_concurrency, 2);
        assert_eq!(snapshot.available_tokens, 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_reports_wait() {
        let governor = governor(1.0, 1, 10);

        let _first = governor.acquire(&weather()).unwrap();
        match governor.acquire(&weather()).unwrap() {
            Admission::WouldBlock(WouldBlock::RateLimited { wait }) => {
                assert_eq!(wait, Duration::from_secs(1));
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
        // A rate-limited denial must not hold a slot
        assert_eq!(governor.in_flight(&weather()).unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permit_drop_releases_slot_on_panic() {
        let governor = Arc::new(governor(100.0, 10, 1));
        let inner = Arc::clone(&governor);

        let handle = tokio::spawn(async move {
            let _permit = match inner.acquire(&SourceId::new("weather")).unwrap() {
                Admission::Granted(permit) => permit,
                _ => unreachable!(),
            };
            panic!("worker blew up");
        });
        assert!(handle.await.is_err());
        assert_eq!(governor.in_flight(&weather()).unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waiting_parks_until_release() {
        let governor = Arc::new(governor(100.0, 10, 1));
        let cancel = CancellationToken::new();

        let held = governor
            .acquire_waiting(&weather(), &cancel)
            .await
            .unwrap()
            .unwrap();

        let waiter = {
            let governor = Arc::clone(&governor);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                governor
                    .acquire_waiting(&SourceId::new("weather"), &cancel)
                    .await
                    .unwrap()
                    .is_some()
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waiting_honors_cancellation() {
        let governor = governor(0.001, 1, 5);
        let cancel = CancellationToken::new();
        let _first = governor.acquire(&weather()).unwrap();

        cancel.cancel();
        let permit = governor.acquire_waiting(&weather(), &cancel).await.unwrap();
        assert!(permit.is_none());
        assert_eq!(governor.in_flight(&weather()).unwrap(), 1);
    }
}
