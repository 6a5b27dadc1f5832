//! Background sampler that turns registry changes into progress updates.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::sink::ProgressSink;
use super::throttle::UpdateThrottle;
use super::update::{ProgressUpdate, build_update};
use crate::config::ProgressConfig;
use crate::registry::{SharedRegistry, TaskSnapshot};

/// Ids being sampled. Once `closed`, the pulse has taken its last look at
/// the list and nothing more may join.
#[derive(Debug, Default)]
struct Tracked {
    ids: Vec<String>,
    closed: bool,
}

/// What has reached the sink so far.
#[derive(Debug, Clone, Default)]
struct Delivered {
    terminal: HashSet<String>,
    finished: bool,
}

/// Samples a set of tasks on a fixed interval and on every registry
/// revision, until none of them is active or it is shut down.
pub struct ProgressCoordinator {
    tracked: Arc<Mutex<Tracked>>,
    delivered: watch::Receiver<Delivered>,
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ProgressCoordinator {
    pub fn spawn(
        registry: SharedRegistry,
        ids: Vec<String>,
        sink: Arc<dyn ProgressSink>,
        config: ProgressConfig,
    ) -> Self {
        let tracked = Arc::new(Mutex::new(Tracked {
            ids: dedup(ids),
            closed: false,
        }));
        let stop = CancellationToken::new();
        let (delivered_tx, delivered) = watch::channel(Delivered::default());

        let handle = tokio::spawn(pulse(
            registry,
            Arc::clone(&tracked),
            sink,
            config,
            stop.clone(),
            delivered_tx,
        ));

        Self {
            tracked,
            delivered,
            stop,
            handle: Some(handle),
        }
    }

    /// Track more tasks. Returns `false`, tracking nothing, once the pulse
    /// has decided to stop; the caller needs a fresh coordinator then.
    pub fn add_ids(&self, more: impl IntoIterator<Item = String>) -> bool {
        let mut tracked = lock(&self.tracked);
        if tracked.closed {
            return false;
        }
        for id in more {
            if !tracked.ids.contains(&id) {
                tracked.ids.push(id);
            }
        }
        true
    }

    pub fn ids(&self) -> Vec<String> {
        lock(&self.tracked).ids.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.delivered.borrow().finished
    }

    /// A handle that resolves once `ids` have each been delivered to the
    /// sink in a terminal state, or the coordinator has finished.
    pub fn flush_handle(&self, ids: Vec<String>) -> ProgressFlush {
        ProgressFlush {
            ids,
            delivered: self.delivered.clone(),
        }
    }

    /// Stop sampling, emit any held-back update, and wait for the task.
    pub async fn shutdown(mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressCoordinator {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl std::fmt::Debug for ProgressCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressCoordinator")
            .field("ids", &self.ids())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Waits for one call's tasks to reach the sink through a coordinator
/// that may be shared with other calls.
#[derive(Debug)]
pub struct ProgressFlush {
    ids: Vec<String>,
    delivered: watch::Receiver<Delivered>,
}

impl ProgressFlush {
    /// Returns `false` if `grace` ran out first.
    pub async fn wait(mut self, grace: Duration) -> bool {
        let ids = self.ids;
        tokio::time::timeout(
            grace,
            self.delivered
                .wait_for(|d| d.finished || ids.iter().all(|id| d.terminal.contains(id))),
        )
        .await
        .is_ok()
    }
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

fn lock(tracked: &Mutex<Tracked>) -> std::sync::MutexGuard<'_, Tracked> {
    tracked.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Snapshots of the tracked tasks plus how many ids were tracked.
async fn sample(registry: &SharedRegistry, tracked: &Mutex<Tracked>) -> (Vec<TaskSnapshot>, usize) {
    let ids = lock(tracked).ids.clone();
    let mut registry = registry.lock().await;
    let snapshots = registry
        .get_tasks(&ids)
        .into_iter()
        .filter_map(|lookup| lookup.into_snapshot())
        .collect();
    (snapshots, ids.len())
}

/// Close the id list unless it grew after the sample was taken.
fn close_if_unchanged(tracked: &Mutex<Tracked>, sampled: usize) -> bool {
    let mut tracked = lock(tracked);
    if tracked.ids.len() != sampled {
        return false;
    }
    tracked.closed = true;
    true
}

fn deliver(sink: &dyn ProgressSink, delivered: &watch::Sender<Delivered>, update: &ProgressUpdate) {
    sink.send(update);
    delivered.send_modify(|d| d.terminal.extend(update.terminal_ids.iter().cloned()));
}

async fn pulse(
    registry: SharedRegistry,
    tracked: Arc<Mutex<Tracked>>,
    sink: Arc<dyn ProgressSink>,
    config: ProgressConfig,
    stop: CancellationToken,
    delivered: watch::Sender<Delivered>,
) {
    let mut revisions = registry.lock().await.subscribe();
    let mut throttle = UpdateThrottle::new(config.interval());
    let mut ticker = tokio::time::interval(config.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {}
        }

        let (snapshots, sampled) = sample(&registry, &tracked).await;
        let update = build_update(&snapshots, &config);
        let active = update.has_active();
        if let Some(update) = throttle.offer(update, Instant::now()) {
            deliver(sink.as_ref(), &delivered, &update);
        }
        if !active {
            if close_if_unchanged(&tracked, sampled) {
                debug!("no active tasks left, progress pulse stopping");
                break;
            }
            debug!("tasks joined while idle, progress pulse continuing");
        }
    }
    lock(&tracked).closed = true;

    // Final state, then whatever the throttle held back.
    let (snapshots, _) = sample(&registry, &tracked).await;
    let update = build_update(&snapshots, &config);
    if let Some(update) = throttle.offer(update, Instant::now()) {
        deliver(sink.as_ref(), &delivered, &update);
    }
    if let Some(update) = throttle.flush() {
        deliver(sink.as_ref(), &delivered, &update);
    }
    delivered.send_modify(|d| d.finished = true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{FnSink, ProgressUpdate};
    use crate::registry::{NewTask, TaskOutcome, TaskRegistry};
    use delegate_store::TaskInvocation;
    use std::time::Duration;

    fn new_task(id: &str) -> NewTask {
        NewTask {
            id: id.to_string(),
            subagent_type: "finder".to_string(),
            description: "d".to_string(),
            prompt: "p".to_string(),
            backend: "simulate".to_string(),
            invocation: TaskInvocation::default(),
        }
    }

    fn recorder() -> (Arc<dyn ProgressSink>, Arc<Mutex<Vec<ProgressUpdate>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink = Arc::new(FnSink(move |u: &ProgressUpdate| {
            sink_seen.lock().unwrap().push(u.clone());
        }));
        (sink, seen)
    }

    fn fast() -> ProgressConfig {
        ProgressConfig {
            interval_ms: 10,
            ..ProgressConfig::default()
        }
    }

    #[tokio::test]
    async fn stops_after_last_task_finishes() {
        let registry = TaskRegistry::in_memory().into_shared();
        registry.lock().await.create_task(new_task("t1")).unwrap();
        registry.lock().await.mark_running("t1", "Running").unwrap();

        let (sink, seen) = recorder();
        let coordinator =
            ProgressCoordinator::spawn(registry.clone(), vec!["t1".into()], sink, fast());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!coordinator.is_finished());

        registry
            .lock()
            .await
            .mark_succeeded("t1", TaskOutcome::new("done", "out"))
            .unwrap();
        for _ in 0..100 {
            if coordinator.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(coordinator.is_finished());

        let seen = seen.lock().unwrap();
        let last = seen.last().unwrap();
        assert_eq!(last.done, 1);
        assert!(!last.has_active());
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_joins_a_live_pulse() {
        let registry = TaskRegistry::in_memory().into_shared();
        registry.lock().await.create_task(new_task("t1")).unwrap();

        let (sink, seen) = recorder();
        let coordinator =
            ProgressCoordinator::spawn(registry.clone(), vec!["t1".into()], sink, fast());
        assert!(coordinator.add_ids(["t1".to_string(), "t2".to_string()]));
        assert_eq!(coordinator.ids(), vec!["t1", "t2"]);
        coordinator.shutdown().await;

        assert!(!seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stopped_coordinator_refuses_new_ids() {
        let registry = TaskRegistry::in_memory().into_shared();
        registry.lock().await.create_task(new_task("t1")).unwrap();
        registry.lock().await.mark_running("t1", "Running").unwrap();
        registry
            .lock()
            .await
            .mark_succeeded("t1", TaskOutcome::new("done", "out"))
            .unwrap();

        let (sink, _seen) = recorder();
        let coordinator =
            ProgressCoordinator::spawn(registry.clone(), vec!["t1".into()], sink, fast());
        coordinator
            .flush_handle(vec!["t1".into()])
            .wait(Duration::from_secs(5))
            .await;
        for _ in 0..100 {
            if coordinator.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(coordinator.is_finished());
        assert!(!coordinator.add_ids(["t2".to_string()]));
        assert_eq!(coordinator.ids(), vec!["t1"]);
    }

    #[tokio::test]
    async fn flush_handle_resolves_after_terminal_update_is_sent() {
        let registry = TaskRegistry::in_memory().into_shared();
        for id in ["t1", "t2"] {
            registry.lock().await.create_task(new_task(id)).unwrap();
            registry.lock().await.mark_running(id, "Running").unwrap();
        }

        let (sink, seen) = recorder();
        let slow = ProgressConfig {
            interval_ms: 60_000,
            ..ProgressConfig::default()
        };
        let coordinator = ProgressCoordinator::spawn(
            registry.clone(),
            vec!["t1".into(), "t2".into()],
            sink,
            slow,
        );
        let flush = coordinator.flush_handle(vec!["t1".into()]);
        registry
            .lock()
            .await
            .mark_succeeded("t1", TaskOutcome::new("done", "out"))
            .unwrap();

        assert!(flush.wait(Duration::from_secs(5)).await);
        {
            let seen = seen.lock().unwrap();
            let last = seen.last().unwrap();
            assert!(last.terminal_ids.contains(&"t1".to_string()));
            assert_eq!(last.running, 1);
        }
        assert!(!coordinator.is_finished(), "t2 is still running");
        coordinator.shutdown().await;
    }
}
