//! Backend registry -- the named collection of available backends.

use std::collections::HashMap;
use std::sync::Arc;

use super::trait_def::ExecutionBackend;

/// Registered [`ExecutionBackend`] implementations, keyed by id.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn ExecutionBackend>>,
}

impl BackendRegistry {
    /// Id used when no backend is configured.
    pub const DEFAULT_BACKEND: &'static str = "simulate";

    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under [`ExecutionBackend::id`]. A backend with the
    /// same id is replaced and returned.
    pub fn register(
        &mut self,
        backend: impl ExecutionBackend + 'static,
    ) -> Option<Arc<dyn ExecutionBackend>> {
        self.register_arc(Arc::new(backend))
    }

    pub fn register_arc(
        &mut self,
        backend: Arc<dyn ExecutionBackend>,
    ) -> Option<Arc<dyn ExecutionBackend>> {
        let id = backend.id().to_string();
        self.backends.insert(id, backend)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ExecutionBackend>> {
        self.backends.get(id).cloned()
    }

    /// Look up the configured backend; `None` means [`Self::DEFAULT_BACKEND`].
    pub fn resolve(&self, configured: Option<&str>) -> Option<Arc<dyn ExecutionBackend>> {
        self.get(configured.unwrap_or(Self::DEFAULT_BACKEND))
    }

    /// Ids of all registered backends, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.backends.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.list())
            .finish()
    }
}
