//! Task state machine transitions.

use delegate_store::TaskState;

/// The task state machine.
///
/// Enforces the valid transition graph:
///
/// ```text
/// queued  -> running
/// queued  -> cancelled
/// running -> succeeded
/// running -> failed
/// running -> cancelled
/// ```
///
/// Terminal states are absorbing.
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Check whether a transition from `from` to `to` is a valid edge
    /// in the state graph.
    pub fn is_valid_transition(from: TaskState, to: TaskState) -> bool {
        matches!(
            (from, to),
            (TaskState::Queued, TaskState::Running)
                | (TaskState::Queued, TaskState::Cancelled)
                | (TaskState::Running, TaskState::Succeeded)
                | (TaskState::Running, TaskState::Failed)
                | (TaskState::Running, TaskState::Cancelled)
        )
    }

    /// All legal edges, in graph order.
    pub fn valid_edges() -> Vec<(TaskState, TaskState)> {
        let mut edges = Vec::new();
        for from in TaskState::ALL {
            for to in TaskState::ALL {
                if Self::is_valid_transition(from, to) {
                    edges.push((from, to));
                }
            }
        }
        edges
    }
}
