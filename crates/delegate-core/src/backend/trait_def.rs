//! The `ExecutionBackend` trait -- the contract every executor implements.
//!
//! The trait is object-safe so backends can be stored as
//! `Arc<dyn ExecutionBackend>` in the [`super::BackendRegistry`].

use async_trait::async_trait;

use super::types::{BackendOutcome, ExecutionContext, RuntimeError, SendRequest, StartRequest};

/// Carries out a task's work.
///
/// Implementations must honour `ctx.cancel` and `ctx.deadline`, and emit
/// live events through `ctx.events` in the order they happen. Returning
/// drops the context, which closes the event channel for the caller.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Stable id (e.g. "simulate").
    fn id(&self) -> &str;

    async fn execute_start(
        &self,
        request: StartRequest,
        ctx: ExecutionContext,
    ) -> Result<BackendOutcome, RuntimeError>;

    async fn execute_send(
        &self,
        request: SendRequest,
        ctx: ExecutionContext,
    ) -> Result<BackendOutcome, RuntimeError>;
}

// Compile-time assertion: ExecutionBackend must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn ExecutionBackend) {}
};
