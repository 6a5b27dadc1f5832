//! Execution backends.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!     |
//!     v
//! BackendRegistry --resolve(None)--> "simulate"
//!     |
//!     |   execute_start(StartRequest, ExecutionContext)
//!     |   execute_send(SendRequest, ExecutionContext)
//!     |        |
//!     |        +--> EventSink (TaskEvent, in emission order)
//!     |        v
//!     |   Result<BackendOutcome, RuntimeError>
//!     |
//!     +-- SimulateBackend      canned output, no I/O
//!     +-- SubprocessBackend    local CLI, may delegate to:
//!     +-- StreamingBackend     StreamRunner -> RunnerEvent channel
//! ```

pub mod claude;
pub mod process;
pub mod registry;
pub mod simulate;
pub mod streaming;
pub mod subprocess;
pub mod trait_def;
pub mod types;

pub use claude::ClaudeStreamRunner;
pub use registry::BackendRegistry;
pub use simulate::SimulateBackend;
pub use streaming::{
    RunnerEvent, RunnerFailure, RunnerFailureKind, RunnerJob, RunnerOutcome, StreamRunner,
    StreamingBackend,
};
pub use subprocess::SubprocessBackend;
pub use trait_def::ExecutionBackend;
pub use types::{
    BackendOutcome, ExecutionContext, RuntimeError, RuntimeStage, SendRequest, StartRequest,
};
