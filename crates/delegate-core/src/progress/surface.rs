//! One live progress coordinator per display surface.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::coordinator::{ProgressCoordinator, ProgressFlush};
use super::sink::ProgressSink;
use crate::config::ProgressConfig;
use crate::registry::SharedRegistry;

/// Surface id -> coordinator. Owned by the composition root.
#[derive(Default)]
pub struct SurfaceRegistry {
    surfaces: Mutex<HashMap<String, ProgressCoordinator>>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `ids` on `surface`. A live coordinator for the surface is
    /// reused unless it has already stopped taking ids; finished
    /// coordinators are dropped from the table.
    pub fn attach(
        &self,
        surface: &str,
        registry: &SharedRegistry,
        ids: Vec<String>,
        sink: Arc<dyn ProgressSink>,
        config: &ProgressConfig,
    ) -> ProgressFlush {
        let mut surfaces = self.lock();
        prune_finished(&mut surfaces);
        if let Some(existing) = surfaces.get(surface) {
            if existing.add_ids(ids.clone()) {
                debug!(surface, "reusing live progress coordinator");
                return existing.flush_handle(ids);
            }
            debug!(surface, "progress coordinator is stopping, starting a fresh one");
        }
        let coordinator =
            ProgressCoordinator::spawn(Arc::clone(registry), ids.clone(), sink, config.clone());
        let flush = coordinator.flush_handle(ids);
        surfaces.insert(surface.to_string(), coordinator);
        flush
    }

    /// Whether `surface` has a coordinator that is still sampling.
    pub fn is_live(&self, surface: &str) -> bool {
        self.lock().get(surface).is_some_and(|c| !c.is_finished())
    }

    /// Coordinators still running.
    pub fn len(&self) -> usize {
        let mut surfaces = self.lock();
        prune_finished(&mut surfaces);
        surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop and remove the coordinator for `surface`.
    pub async fn dispose(&self, surface: &str) -> bool {
        let removed = self.lock().remove(surface);
        match removed {
            Some(coordinator) => {
                coordinator.shutdown().await;
                true
            }
            None => false,
        }
    }

    pub async fn dispose_all(&self) {
        let all: Vec<ProgressCoordinator> = self.lock().drain().map(|(_, c)| c).collect();
        for coordinator in all {
            coordinator.shutdown().await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ProgressCoordinator>> {
        self.surfaces
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn prune_finished(surfaces: &mut HashMap<String, ProgressCoordinator>) {
    surfaces.retain(|surface, coordinator| {
        let keep = !coordinator.is_finished();
        if !keep {
            debug!(surface = %surface, "dropping finished progress coordinator");
        }
        keep
    });
}

impl std::fmt::Debug for SurfaceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort_unstable();
        f.debug_struct("SurfaceRegistry").field("surfaces", &names).finish()
    }
}
