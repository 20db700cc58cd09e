use super::{
    errors::{StateMachineError, StateMachineResult},
    events::LoopEvent,
    states::LoopState,
};
use tokio::sync::watch;
use tracing::debug;

/// Cyclic stage tracker for the reconciliation loop.
///
/// `Idle → Detecting → Dispatching → Awaiting → Updating → Sleeping → Idle`,
/// with early exits to `Sleeping` when a systemic failure aborts detection or
/// the inventory update. The current stage is published on a watch channel.
#[derive(Debug)]
pub struct LoopStateMachine {
    state_tx: watch::Sender<LoopState>,
}

impl Default for LoopStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopStateMachine {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(LoopState::Idle);
        Self { state_tx }
    }

    pub fn current(&self) -> LoopState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state_tx.subscribe()
    }

    pub fn transition(&self, event: LoopEvent) -> StateMachineResult<LoopState> {
        let current_state = self.current();
        let target_state = Self::determine_target_state(current_state, &event)?;

        self.state_tx.send_replace(target_state);
        debug!(
            from = %current_state,
            to = %target_state,
            event = event.event_type(),
            "loop transition"
        );
        Ok(target_state)
    }

    fn determine_target_state(
        current_state: LoopState,
        event: &LoopEvent,
    ) -> StateMachineResult<LoopState> {
        let target = match (current_state, event) {
            (LoopState::Idle, LoopEvent::BeginCycle) => LoopState::Detecting,
            (LoopState::Detecting, LoopEvent::GapsDetected) => LoopState::Dispatching,
            (LoopState::Dispatching, LoopEvent::DispatchStarted) => LoopState::Awaiting,
            (LoopState::Awaiting, LoopEvent::OutcomesCollected) => LoopState::Updating,
            (LoopState::Updating, LoopEvent::InventoryUpdated) => LoopState::Sleeping,
            (LoopState::Detecting | LoopState::Updating, LoopEvent::Abort(_)) => {
                LoopState::Sleeping
            }
            (LoopState::Sleeping, LoopEvent::Wake) => LoopState::Idle,

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle_returns_to_idle() {
        let machine = LoopStateMachine::new();
        let events = [
            (LoopEvent::BeginCycle, LoopState::Detecting),
            (LoopEvent::GapsDetected, LoopState::Dispatching),
            (LoopEvent::DispatchStarted, LoopState::Awaiting),
            (LoopEvent::OutcomesCollected, LoopState::Updating),
            (LoopEvent::InventoryUpdated, LoopState::Sleeping),
            (LoopEvent::Wake, LoopState::Idle),
        ];
        for (event, expected) in events {
            assert_eq!(machine.transition(event), Ok(expected));
        }
        assert_eq!(machine.current(), LoopState::Idle);
    }

    #[test]
    fn test_abort_only_from_detecting_or_updating() {
        let machine = LoopStateMachine::new();
        machine.transition(LoopEvent::BeginCycle).unwrap();
        assert_eq!(
            machine.transition(LoopEvent::Abort("inventory down".into())),
            Ok(LoopState::Sleeping)
        );

        let machine = LoopStateMachine::new();
        machine.transition(LoopEvent::BeginCycle).unwrap();
        machine.transition(LoopEvent::GapsDetected).unwrap();
        machine.transition(LoopEvent::DispatchStarted).unwrap();
        assert!(machine
            .transition(LoopEvent::Abort("nope".into()))
            .is_err());
        assert_eq!(machine.current(), LoopState::Awaiting);
    }

    #[test]
    fn test_subscribers_observe_stage_changes() {
        let machine = LoopStateMachine::new();
        let rx = machine.subscribe();
        machine.transition(LoopEvent::BeginCycle).unwrap();
        assert_eq!(*rx.borrow(), LoopState::Detecting);
    }
}
