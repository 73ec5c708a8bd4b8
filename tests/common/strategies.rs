use geoconv_core::state_machine::TaskState;
use proptest::prelude::*;

/// Strategy for generating any task state
pub fn task_state_strategy() -> impl Strategy<Value = TaskState> {
    prop::sample::select(TaskState::ALL.to_vec())
}

/// Strategy for generating task statuses, including rows without one
pub fn optional_state_strategy() -> impl Strategy<Value = Option<TaskState>> {
    prop::option::of(task_state_strategy())
}

/// Strategy for generating the statuses of a group of tasks
pub fn group_statuses_strategy() -> impl Strategy<Value = Vec<Option<TaskState>>> {
    prop::collection::vec(optional_state_strategy(), 0..50)
}

/// Strategy for generating upload file names
pub fn file_name_strategy() -> impl Strategy<Value = String> {
    ("[a-zA-Z0-9_-]{1,24}", prop_oneof![Just("zip"), Just("ZIP"), Just("xml"), Just("tar.gz")])
        .prop_map(|(stem, ext)| format!("{stem}.{ext}"))
}
