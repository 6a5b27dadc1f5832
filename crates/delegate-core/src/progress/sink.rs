use std::sync::Arc;

use super::update::ProgressUpdate;

/// Receives progress updates. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn send(&self, update: &ProgressUpdate);
}

const _: () = {
    fn _assert_object_safe(_: &dyn ProgressSink) {}
};

/// Adapts a closure into a [`ProgressSink`].
pub struct FnSink<F>(pub F);

impl<F> ProgressSink for FnSink<F>
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn send(&self, update: &ProgressUpdate) {
        (self.0)(update)
    }
}

/// Forwards every update to each inner sink in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ProgressSink for FanoutSink {
    fn send(&self, update: &ProgressUpdate) {
        for sink in &self.sinks {
            sink.send(update);
        }
    }
}
