use std::sync::Arc;

use tracing::warn;

use crate::model::{ArtifactStat, ArtifactStore, VersionId};

/// Read-through listing of the versions the store currently holds. Nothing is
/// cached, so artifacts dropped into the store show up on the next call.
#[derive(Clone)]
pub struct VersionCatalog {
    store: Arc<dyn ArtifactStore>,
}

impl VersionCatalog {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Sorted ascending. An unreadable store lists as empty.
    pub fn list_versions(&self) -> Vec<VersionId> {
        let mut versions = match self.store.versions() {
            Ok(versions) => versions,
            Err(err) => {
                warn!(error = %err, "failed to enumerate artifact store");
                Vec::new()
            }
        };
        versions.sort();
        versions.dedup();
        versions
    }

    pub fn exists(&self, version: &VersionId) -> bool {
        self.store.contains(version)
    }

    pub fn stat(&self, version: &VersionId) -> Option<ArtifactStat> {
        self.store.stat(version)
    }
}
