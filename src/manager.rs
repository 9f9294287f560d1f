//! Experiment Manager - discovery plus one cached reader per experiment
//!
//! The manager is constructed once by the process entry point and passed
//! to whatever needs it. It owns no program data; readers do.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::model::{experiment_id, ChangeEvent, EventType, Experiment};
use crate::reader::StoreReader;
use crate::registry::{DiscoveredExperiment, FormatRegistry};
use crate::watch::ChangeEngine;
use crate::{Error, Result};

struct Managed {
    reader: Arc<dyn StoreReader>,
    last_info: Experiment,
}

/// Discovers experiments under the scan root and serves their readers.
pub struct ExperimentManager {
    registry: Arc<FormatRegistry>,
    config: Config,
    engine: Option<ChangeEngine>,
    experiments: DashMap<String, Managed>,
}

impl ExperimentManager {
    /// Create a manager with no change engine.
    #[must_use]
    pub fn new(registry: Arc<FormatRegistry>, config: Config) -> Self {
        Self {
            registry,
            config,
            engine: None,
            experiments: DashMap::new(),
        }
    }

    /// Register every discovered experiment with `engine`.
    #[must_use]
    pub fn with_change_engine(mut self, engine: ChangeEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Format registry in use.
    #[must_use]
    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Change engine, when one was supplied.
    #[must_use]
    pub fn change_engine(&self) -> Option<&ChangeEngine> {
        self.engine.as_ref()
    }

    /// Discover experiments under the scan root and add the new ones.
    /// Returns the ids added by this pass. One experiment failing to load
    /// never stops the others.
    pub fn scan(&self) -> Vec<String> {
        let root = &self.config.scan_root;
        let discovered = self.registry.discover_all(root);
        debug!(root = %root.display(), found = discovered.len(), "Scan complete");
        discovered
            .into_iter()
            .filter_map(|found| self.add(found))
            .collect()
    }

    fn add(&self, found: DiscoveredExperiment) -> Option<String> {
        let id = experiment_id(&found.format, &found.root);
        if self.experiments.contains_key(&id) {
            return None;
        }
        let reader = match self.registry.create_reader(
            &found.root,
            found.format.as_str(),
            self.config.thresholds(),
        ) {
            Ok(reader) => reader,
            Err(e) => {
                warn!(path = %found.root.display(), error = %e, "No reader for discovered experiment");
                return None;
            }
        };
        let info = match reader.experiment_info() {
            Ok(info) => info,
            Err(e) => {
                warn!(path = %found.root.display(), error = %e, "Failed to load experiment");
                return None;
            }
        };
        info!(experiment = %info.id, framework = %info.framework, "Registered experiment");

        if let Some(engine) = &self.engine {
            engine.register(&info.id, &found.root, self.registry.strategy(&found.format));
            engine.emit(
                ChangeEvent::now(EventType::ExperimentDiscovered, info.id.clone())
                    .with_data("framework", found.format.as_str())
                    .with_data("path", found.root.display().to_string()),
            );
        }
        let id = info.id.clone();
        self.experiments.insert(
            id.clone(),
            Managed {
                reader,
                last_info: info,
            },
        );
        Some(id)
    }

    /// Every known experiment, refreshed from disk. When a refresh fails
    /// the last good info is returned instead. Ordered by id.
    #[must_use]
    pub fn list_experiments(&self) -> Vec<Experiment> {
        let ids: Vec<String> = self.experiments.iter().map(|e| e.key().clone()).collect();
        let mut out: Vec<Experiment> = ids.iter().filter_map(|id| self.experiment(id)).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// One experiment, refreshed from disk; `None` when unknown.
    #[must_use]
    pub fn experiment(&self, id: &str) -> Option<Experiment> {
        let reader = self.reader(id)?;
        match reader.experiment_info() {
            Ok(info) => {
                if let Some(mut entry) = self.experiments.get_mut(id) {
                    entry.last_info = info.clone();
                }
                Some(info)
            }
            Err(e) => {
                debug!(experiment = id, error = %e, "Refresh failed, serving last info");
                self.experiments.get(id).map(|m| m.last_info.clone())
            }
        }
    }

    /// Reader for one experiment.
    #[must_use]
    pub fn reader(&self, id: &str) -> Option<Arc<dyn StoreReader>> {
        self.experiments.get(id).map(|m| Arc::clone(&m.reader))
    }

    /// Every reader, keyed by experiment id.
    #[must_use]
    pub fn readers(&self) -> Vec<(String, Arc<dyn StoreReader>)> {
        self.experiments
            .iter()
            .map(|m| (m.key().clone(), Arc::clone(&m.reader)))
            .collect()
    }

    /// Number of known experiments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    /// Whether no experiments are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }

    /// Re-run [`scan`](Self::scan) every `rescan_interval` on the blocking
    /// pool until the returned handle is stopped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] when called outside a Tokio runtime.
    pub fn spawn_rescan(self: &Arc<Self>) -> Result<RescanHandle> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::Unsupported("rescanning needs a Tokio runtime"))?;
        let period = self.config.rescan_interval;
        let manager = Arc::clone(self);
        let (tx, mut rx) = watch::channel(false);

        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let scanning = Arc::clone(&manager);
                        match tokio::task::spawn_blocking(move || scanning.scan()).await {
                            Ok(added) if !added.is_empty() => {
                                info!(added = added.len(), "Rescan found new experiments");
                            }
                            Ok(_) => {}
                            Err(e) => error!(error = %e, "Rescan failed"),
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(RescanHandle { shutdown: tx, task })
    }
}

impl std::fmt::Debug for ExperimentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentManager")
            .field("scan_root", &self.config.scan_root)
            .field("experiments", &self.experiments.len())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Stops a background rescan loop.
#[derive(Debug)]
pub struct RescanHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RescanHandle {
    /// Signal the loop and wait for it to exit. A scan already in
    /// progress finishes first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Rescan task ended abnormally");
        }
    }
}
