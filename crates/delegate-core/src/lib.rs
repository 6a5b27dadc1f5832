//! Orchestration engine for delegated subagent tasks.
//!
//! ```text
//! caller -> Orchestrator -> TaskRegistry / ExecutionBackend
//!                        -> BatchScheduler (batches)
//!                        -> ProgressCoordinator -> ProgressSink
//! ```

pub mod backend;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod policy;
pub mod progress;
pub mod registry;
pub mod scheduler;
pub mod transcript;

#[cfg(test)]
mod test_util;

pub use error::{ErrorCategory, ErrorCode, OperationError};
pub use orchestrator::{CallContext, Operation, OperationResult, Orchestrator};
pub use registry::{SharedRegistry, TaskRegistry, TaskRuntimeLookup, TaskSnapshot};
