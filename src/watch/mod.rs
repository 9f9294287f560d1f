//! Change-Detection Engine
//!
//! Tells callers "re-fetch now" for an experiment. Each registered
//! experiment is either polled (mtime of its store file compared on a fixed
//! interval) or watched (recursive filesystem notifications). Every event,
//! whatever its source, goes through one debounce keyed by
//! `(experiment id, event type)` before reaching subscribers.
//!
//! ```text
//! register ──> Registered ──start──> Polled  (tokio interval task)
//!                            └─────> Watched (notify backend thread)
//!                                        │
//!                      poll / fs event ──┴──> Debouncer ──> subscribers
//! ```
//!
//! The engine never touches reader caches; it only owns paths, last-seen
//! mtimes and debounce timestamps.

mod debounce;
mod fs;
mod poll;
mod subscriber;

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use notify::RecommendedWatcher;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::model::{ChangeEvent, EventType};
use crate::reader::modified_secs;
use crate::registry::ChangeStrategy;
use crate::{Error, Result};

pub use debounce::Debouncer;
pub use fs::{is_data_file, DATA_EXTENSIONS};
pub use poll::PollTracker;
pub use subscriber::{AsyncCallback, SubscriptionId, SyncCallback};

use subscriber::Subscriber;

/// Lifecycle of one watched experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    /// Known to the engine, not yet active
    Registered,
    /// Covered by the poll loop
    Polled,
    /// Covered by a filesystem watcher
    Watched,
}

/// Watch metadata for one experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedExperiment {
    /// Store file (poll) or experiment directory (watch)
    pub path: PathBuf,
    /// Strategy chosen by the experiment's format
    pub strategy: ChangeStrategy,
    /// Current state
    pub state: WatchState,
}

struct Inner {
    poll_interval: Duration,
    debounce: Debouncer,
    polls: PollTracker,
    experiments: DashMap<String, WatchedExperiment>,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber)>>,
    next_subscription: AtomicU64,
    watchers: Mutex<HashMap<String, RecommendedWatcher>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

/// Process-wide change detector. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ChangeEngine {
    inner: Arc<Inner>,
}

impl ChangeEngine {
    /// Create a stopped engine.
    #[must_use]
    pub fn new(poll_interval: Duration, debounce_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                poll_interval,
                debounce: Debouncer::new(debounce_interval),
                polls: PollTracker::new(),
                experiments: DashMap::new(),
                subscribers: RwLock::new(Vec::new()),
                next_subscription: AtomicU64::new(0),
                watchers: Mutex::new(HashMap::new()),
                shutdown: Mutex::new(None),
                poll_task: Mutex::new(None),
            }),
        }
    }

    /// Create a stopped engine using the configured intervals.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.poll_interval, config.debounce_interval)
    }

    /// Poll loop period.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    /// Whether the poll loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.shutdown.lock().is_some()
    }

    /// Register (or re-register) an experiment. If the engine is already
    /// running the experiment is activated immediately.
    pub fn register(&self, experiment_id: &str, path: impl Into<PathBuf>, strategy: ChangeStrategy) {
        let path = path.into();
        if let Some(existing) = self.inner.experiments.get(experiment_id) {
            if existing.path == path && existing.strategy == strategy {
                return;
            }
        }
        self.deactivate(experiment_id);
        debug!(experiment = experiment_id, path = %path.display(), ?strategy, "Registered for change detection");
        self.inner.experiments.insert(
            experiment_id.to_string(),
            WatchedExperiment {
                path,
                strategy,
                state: WatchState::Registered,
            },
        );
        if self.is_running() {
            self.activate(experiment_id);
        }
    }

    /// Forget an experiment entirely.
    pub fn unregister(&self, experiment_id: &str) -> bool {
        self.deactivate(experiment_id);
        self.inner.debounce.forget(experiment_id);
        self.inner.experiments.remove(experiment_id).is_some()
    }

    /// Watch metadata for one experiment.
    #[must_use]
    pub fn watched(&self, experiment_id: &str) -> Option<WatchedExperiment> {
        self.inner.experiments.get(experiment_id).map(|e| e.clone())
    }

    /// State of one experiment, `None` when unregistered.
    #[must_use]
    pub fn state(&self, experiment_id: &str) -> Option<WatchState> {
        self.inner.experiments.get(experiment_id).map(|e| e.state)
    }

    /// Number of registered experiments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.experiments.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.experiments.is_empty()
    }

    /// Subscribe a synchronous callback. It runs on whichever thread
    /// emitted the event; errors and panics are logged and contained.
    pub fn on_change<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(Subscriber::Sync(Arc::new(callback)))
    }

    /// Subscribe an asynchronous callback. Its futures are spawned on the
    /// Tokio runtime current at subscription time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] when called outside a Tokio runtime.
    pub fn on_change_async<F, Fut>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(ChangeEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let runtime = Handle::try_current()
            .map_err(|_| Error::Unsupported("async subscribers need a Tokio runtime"))?;
        let callback: AsyncCallback = Arc::new(move |event| callback(event).boxed());
        Ok(self.subscribe(Subscriber::Async { callback, runtime }))
    }

    /// Remove a subscriber.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    fn subscribe(&self, subscriber: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.inner.subscribers.write().push((id, subscriber));
        id
    }

    /// Debounce `event` and, if admitted, hand it to every subscriber.
    /// Returns whether the event was delivered.
    pub fn emit(&self, event: ChangeEvent) -> bool {
        self.inner.emit(&event)
    }

    /// Run one poll pass over every poll-strategy experiment. Returns the
    /// number of events delivered. The poll loop calls this on its interval.
    pub fn poll_once(&self) -> usize {
        self.inner.poll_once()
    }

    /// Start the poll loop and the filesystem watchers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] when called outside a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::Unsupported("the change engine needs a Tokio runtime"))?;
        let mut shutdown = self.inner.shutdown.lock();
        if shutdown.is_some() {
            return Ok(());
        }
        let (tx, mut rx) = watch::channel(false);
        *shutdown = Some(tx);
        drop(shutdown);

        let ids: Vec<String> = self.inner.experiments.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.activate(&id);
        }

        let inner = Arc::clone(&self.inner);
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(inner.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        inner.poll_once();
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Poll loop stopped");
        });
        *self.inner.poll_task.lock() = Some(task);
        info!(
            experiments = self.len(),
            poll_interval_ms = u64::try_from(self.inner.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "Change detection started"
        );
        Ok(())
    }

    /// Stop the poll loop and drop every filesystem watcher. Waits for the
    /// poll task to finish its current pass.
    pub async fn stop(&self) {
        let Some(tx) = self.inner.shutdown.lock().take() else {
            return;
        };
        let _ = tx.send(true);
        let task = self.inner.poll_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Poll task ended abnormally");
            }
        }
        self.inner.watchers.lock().clear();
        for mut entry in self.inner.experiments.iter_mut() {
            entry.state = WatchState::Registered;
        }
        info!("Change detection stopped");
    }

    fn activate(&self, experiment_id: &str) {
        let Some((path, strategy)) = self
            .inner
            .experiments
            .get(experiment_id)
            .map(|e| (e.path.clone(), e.strategy))
        else {
            return;
        };
        let state = match strategy {
            ChangeStrategy::Poll => WatchState::Polled,
            ChangeStrategy::Watch => match self.spawn_watcher(experiment_id, &path) {
                Ok(watcher) => {
                    self.inner.watchers.lock().insert(experiment_id.to_string(), watcher);
                    WatchState::Watched
                }
                Err(e) => {
                    warn!(experiment = experiment_id, path = %path.display(), error = %e, "Failed to watch experiment");
                    WatchState::Registered
                }
            },
        };
        if let Some(mut entry) = self.inner.experiments.get_mut(experiment_id) {
            entry.state = state;
        }
    }

    fn deactivate(&self, experiment_id: &str) {
        self.inner.watchers.lock().remove(experiment_id);
        self.inner.polls.forget(experiment_id);
        if let Some(mut entry) = self.inner.experiments.get_mut(experiment_id) {
            entry.state = WatchState::Registered;
        }
    }

    fn spawn_watcher(&self, experiment_id: &str, dir: &Path) -> Result<RecommendedWatcher> {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let id = experiment_id.to_string();
        fs::watch_dir(dir, move |file| {
            if let Some(inner) = inner.upgrade() {
                inner.handle_fs_event(&id, &file);
            }
        })
    }
}

impl Inner {
    fn emit(&self, event: &ChangeEvent) -> bool {
        if !self.debounce.admit(&event.experiment_id, event.event_type) {
            debug!(experiment = %event.experiment_id, event = event.event_type.as_str(), "Debounced");
            return false;
        }
        let subscribers = self.subscribers.read().clone();
        for (id, subscriber) in &subscribers {
            subscriber.deliver(*id, event);
        }
        true
    }

    fn poll_once(&self) -> usize {
        let targets: Vec<(String, PathBuf)> = self
            .experiments
            .iter()
            .filter(|e| e.strategy == ChangeStrategy::Poll)
            .map(|e| (e.key().clone(), e.path.clone()))
            .collect();
        let mut delivered = 0;
        for (id, path) in targets {
            let Some(mtime) = store_mtime(&path) else {
                continue;
            };
            if self.polls.observe(&id, mtime) {
                let event = ChangeEvent::now(EventType::NewProgram, id).with_data("source", "poll");
                if self.emit(&event) {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    fn handle_fs_event(&self, experiment_id: &str, file: &Path) {
        if !is_data_file(file) {
            return;
        }
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let event = ChangeEvent::now(EventType::NewProgram, experiment_id)
            .with_data("source", "watch")
            .with_data("file", name);
        self.emit(&event);
    }
}

impl std::fmt::Debug for ChangeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeEngine")
            .field("poll_interval", &self.inner.poll_interval)
            .field("debounce", &self.inner.debounce.interval())
            .field("experiments", &self.inner.experiments.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Store mtime for polling: the file itself, or its SQLite write-ahead
/// log sibling when that is newer. `None` while the store is missing.
fn store_mtime(path: &Path) -> Option<f64> {
    let main = modified_secs(path)?;
    let mut wal = path.as_os_str().to_owned();
    wal.push("-wal");
    Some(modified_secs(Path::new(&wal)).map_or(main, |w| w.max(main)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(engine: &ChangeEngine) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        engine.on_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        hits
    }

    #[test]
    fn test_register_is_idempotent() {
        let engine = ChangeEngine::new(Duration::from_secs(2), Duration::from_secs(1));
        engine.register("exp", "/nonexistent/a.db", ChangeStrategy::Poll);
        engine.register("exp", "/nonexistent/a.db", ChangeStrategy::Poll);
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.state("exp"), Some(WatchState::Registered));
        assert!(engine.unregister("exp"));
        assert!(engine.is_empty());
    }

    #[test]
    fn test_fs_event_filters_extensions() {
        let engine = ChangeEngine::new(Duration::from_secs(2), Duration::ZERO);
        let hits = counting(&engine);
        engine.inner.handle_fs_event("exp", Path::new("/x/checkpoint_1/programs/a.json"));
        engine.inner.handle_fs_event("exp", Path::new("/x/best_program.py"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_store_is_not_an_observation() {
        let engine = ChangeEngine::new(Duration::from_secs(2), Duration::ZERO);
        engine.register("exp", "/nonexistent/run.sqlite", ChangeStrategy::Poll);
        assert_eq!(engine.poll_once(), 0);
        assert_eq!(engine.inner.polls.last_seen("exp"), None);
    }

    #[test]
    fn test_unsubscribe() {
        let engine = ChangeEngine::new(Duration::from_secs(2), Duration::ZERO);
        let id = engine.on_change(|_| Ok(()));
        assert_eq!(engine.subscriber_count(), 1);
        assert!(engine.unsubscribe(id));
        assert!(!engine.unsubscribe(id));
    }

    #[test]
    fn test_start_outside_runtime_is_rejected() {
        let engine = ChangeEngine::new(Duration::from_secs(2), Duration::from_secs(1));
        assert!(matches!(engine.start(), Err(Error::Unsupported(_))));
    }
}
