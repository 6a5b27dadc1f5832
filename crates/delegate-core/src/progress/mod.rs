//! Live progress for running tasks.
//!
//! A [`ProgressCoordinator`] samples the registry in the background and
//! pushes bounded [`ProgressUpdate`]s through a [`ProgressSink`], throttled
//! by [`UpdateThrottle`]. A [`SurfaceRegistry`] keeps one live coordinator
//! per display surface.

pub mod coordinator;
pub mod sink;
pub mod surface;
pub mod throttle;
pub mod update;

pub use coordinator::{ProgressCoordinator, ProgressFlush};
pub use sink::{FanoutSink, FnSink, ProgressSink};
pub use surface::SurfaceRegistry;
pub use throttle::UpdateThrottle;
pub use update::{ProgressRow, ProgressUpdate, build_update, truncate_chars};
