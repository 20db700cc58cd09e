// State machines for the collector.
//
// Both the per-task retry lifecycle and the reconciliation loop are explicit,
// bounded transition tables rather than ad hoc loops.

pub mod errors;
pub mod events;
pub mod loop_state_machine;
pub mod states;
pub mod task_state_machine;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::{LoopEvent, TaskEvent};
pub use loop_state_machine::LoopStateMachine;
pub use states::{LoopState, TaskState};
pub use task_state_machine::TaskStateMachine;
