// Task lifecycle state machine
//
// States and events of a conversion task, the transition table, and the
// token-guarded persistence used by pipeline runs.

pub mod errors;
pub mod events;
pub mod persistence;
pub mod states;
pub mod task_state_machine;

// Re-export main types for convenient access
pub use errors::{PersistenceError, StateMachineError, StateMachineResult};
pub use events::TaskEvent;
pub use persistence::TaskTransitionPersistence;
pub use states::TaskState;
pub use task_state_machine::TaskStateMachine;
