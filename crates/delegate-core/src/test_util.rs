//! Fixtures shared by unit tests in this crate.

use delegate_store::{TaskInvocation, TaskState};

use crate::registry::TaskSnapshot;

/// A snapshot in `state` built from the shared sample record.
pub fn snapshot(id: &str, state: TaskState) -> TaskSnapshot {
    TaskSnapshot {
        record: delegate_test_utils::sample_record(id, state),
        summary: format!("{state}"),
        output: state.is_terminal().then(|| format!("output of {id}")),
        backend: "simulate".to_string(),
        provider: None,
        model: None,
        runtime: None,
        route: None,
        invocation: TaskInvocation::default(),
        follow_up_prompts: Vec::new(),
        events: Vec::new(),
        interaction_active: false,
    }
}
