//! Composition root: wires the registry, backends and catalog into an
//! [`Orchestrator`] from a resolved [`DelegateConfig`].

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use delegate_core::backend::{
    BackendRegistry, ClaudeStreamRunner, SimulateBackend, StreamingBackend, SubprocessBackend,
};
use delegate_core::catalog::SubagentCatalog;
use delegate_core::clock::SystemClock;
use delegate_core::progress::SurfaceRegistry;
use delegate_core::registry::RegistryConfig;
use delegate_core::{Orchestrator, TaskRegistry};

use crate::config::DelegateConfig;

/// Every backend the binary knows about. The engine config picks one.
pub fn build_backends(config: &DelegateConfig) -> BackendRegistry {
    let engine = &config.engine;
    let runner = ClaudeStreamRunner::with_binary(engine.subprocess.streaming_binary.clone())
        .grace_period(engine.subprocess.grace_period());
    let streaming = Arc::new(StreamingBackend::new(Arc::new(runner)));

    let subprocess = SubprocessBackend::new(engine.subprocess.clone())
        .with_streaming(Arc::clone(&streaming), engine.runtime)
        .with_fallback(engine.streaming_fallback);

    let mut backends = BackendRegistry::new();
    backends.register(SimulateBackend::new());
    backends.register(subprocess);
    backends.register_arc(streaming);
    backends
}

/// Open the registry file and assemble the orchestrator.
pub fn build_orchestrator(config: &DelegateConfig) -> Result<Orchestrator> {
    let registry = TaskRegistry::new(
        RegistryConfig::at(&config.registry_path).with_retention(config.engine.retention()),
        Arc::new(SystemClock),
    );
    for (code, message) in registry.persistence_diagnostics().issues() {
        warn!(%code, path = %config.registry_path.display(), "{message}");
    }
    debug!(
        path = %config.registry_path.display(),
        tasks = registry.len(),
        "task registry loaded"
    );

    let backends = build_backends(config);
    if let Some(configured) = config.engine.backend.as_deref() {
        if backends.get(configured).is_none() {
            anyhow::bail!(
                "unknown backend {configured:?}; expected one of {}",
                backends.list().join(", ")
            );
        }
    }

    let catalog: Arc<dyn SubagentCatalog> = Arc::new(config.catalog.clone());
    let cwd = std::env::current_dir().context("failed to read the current directory")?;

    Ok(Orchestrator::new(
        registry.into_shared(),
        backends,
        catalog,
        config.engine.clone(),
    )
    .with_surfaces(Arc::new(SurfaceRegistry::new()))
    .with_cwd(cwd))
}
