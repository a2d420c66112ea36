use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::RwLock;
use tokio::{sync::watch, task};
use tracing::debug;

use crate::{
    error::LoadError,
    model::{ArtifactHandle, ArtifactLoader, VersionId},
    observer::{RegistryEvent, RegistryObserver},
};

/// A successfully loaded artifact.
#[derive(Clone)]
pub struct CacheEntry {
    pub version: VersionId,
    pub artifact: ArtifactHandle,
    pub load_duration: Duration,
}

type LoadOutcome = Result<CacheEntry, LoadError>;

enum Slot {
    Ready(CacheEntry),
    /// A load is in flight; waiters subscribe to its outcome.
    Loading(watch::Receiver<Option<LoadOutcome>>),
}

type Slots = Arc<RwLock<HashMap<VersionId, Slot>>>;

/// At most one loaded artifact per version, with at most one load in flight
/// per version.
///
/// Loads run in a detached task, so a caller that stops waiting never aborts
/// a load other callers are sharing. Failed loads leave no trace; the next
/// request starts over. Evicting only drops the cache's reference: callers
/// already holding an [`ArtifactHandle`] keep using it.
pub struct ModelCache {
    slots: Slots,
    loader: Arc<dyn ArtifactLoader>,
    observer: Arc<dyn RegistryObserver>,
}

impl ModelCache {
    pub fn new(loader: Arc<dyn ArtifactLoader>, observer: Arc<dyn RegistryObserver>) -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            loader,
            observer,
        }
    }

    pub async fn get(&self, version: &VersionId) -> Result<CacheEntry, LoadError> {
        if let Some(entry) = self.ready(version) {
            self.observer.on_event(&RegistryEvent::CacheHit {
                version: version.clone(),
            });
            return Ok(entry);
        }

        let (mut outcome, leader) = {
            let mut slots = self.slots.write();
            match slots.get(version) {
                Some(Slot::Ready(entry)) => {
                    let entry = entry.clone();
                    drop(slots);
                    self.observer.on_event(&RegistryEvent::CacheHit {
                        version: version.clone(),
                    });
                    return Ok(entry);
                }
                Some(Slot::Loading(outcome)) => (outcome.clone(), false),
                None => {
                    let (tx, rx) = watch::channel(None);
                    slots.insert(version.clone(), Slot::Loading(rx.clone()));
                    self.spawn_load(version.clone(), tx);
                    (rx, true)
                }
            }
        };

        if leader {
            self.observer.on_event(&RegistryEvent::CacheMiss {
                version: version.clone(),
            });
        } else {
            debug!(%version, "joining in-flight model load");
        }

        let shared = match outcome.wait_for(Option::is_some).await {
            Ok(state) => state.clone(),
            Err(_) => None,
        };
        shared.unwrap_or_else(|| {
            Err(LoadError::Interrupted {
                version: version.clone(),
                reason: "load task ended without reporting".to_string(),
            })
        })
    }

    fn spawn_load(&self, version: VersionId, tx: watch::Sender<Option<LoadOutcome>>) {
        let slots = Arc::clone(&self.slots);
        let loader = Arc::clone(&self.loader);
        let observer = Arc::clone(&self.observer);

        tokio::spawn(async move {
            let target = version.clone();
            let joined = task::spawn_blocking(move || loader.load(&target)).await;
            let outcome = match joined {
                Ok(Ok(loaded)) => Ok(CacheEntry {
                    version: version.clone(),
                    artifact: loaded.artifact,
                    load_duration: loaded.load_duration,
                }),
                Ok(Err(err)) => Err(err),
                Err(err) => Err(LoadError::Interrupted {
                    version: version.clone(),
                    reason: err.to_string(),
                }),
            };

            {
                let mut slots = slots.write();
                match &outcome {
                    Ok(entry) => {
                        slots.insert(version.clone(), Slot::Ready(entry.clone()));
                    }
                    Err(_) => {
                        slots.remove(&version);
                    }
                }
            }

            match &outcome {
                Ok(entry) => observer.on_event(&RegistryEvent::ArtifactLoaded {
                    version: version.clone(),
                    duration: entry.load_duration,
                }),
                Err(error) => observer.on_event(&RegistryEvent::ArtifactLoadFailed {
                    version: version.clone(),
                    error: error.clone(),
                }),
            }

            // Nobody may be waiting any more; the slot is already settled.
            let _ = tx.send(Some(outcome));
        });
    }

    fn ready(&self, version: &VersionId) -> Option<CacheEntry> {
        match self.slots.read().get(version) {
            Some(Slot::Ready(entry)) => Some(entry.clone()),
            _ => None,
        }
    }

    /// Drops the loaded entry for `version`. A load still in flight is left
    /// alone and lands normally.
    pub fn evict(&self, version: &VersionId) -> bool {
        let removed = {
            let mut slots = self.slots.write();
            if matches!(slots.get(version), Some(Slot::Ready(_))) {
                slots.remove(version).is_some()
            } else {
                false
            }
        };
        if removed {
            self.observer.on_event(&RegistryEvent::Evicted {
                version: version.clone(),
            });
        }
        removed
    }

    /// Drops every loaded entry and returns how many there were.
    pub fn evict_all(&self) -> usize {
        let evicted = {
            let mut slots = self.slots.write();
            let before = slots.len();
            slots.retain(|_, slot| matches!(slot, Slot::Loading(_)));
            before - slots.len()
        };
        self.observer
            .on_event(&RegistryEvent::CacheCleared { evicted });
        evicted
    }

    pub fn is_loaded(&self, version: &VersionId) -> bool {
        matches!(self.slots.read().get(version), Some(Slot::Ready(_)))
    }

    pub fn load_duration(&self, version: &VersionId) -> Option<Duration> {
        self.ready(version).map(|entry| entry.load_duration)
    }

    pub fn loaded_versions(&self) -> Vec<VersionId> {
        let mut versions: Vec<VersionId> = self
            .slots
            .read()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(version, _)| version.clone())
            .collect();
        versions.sort();
        versions
    }
}
