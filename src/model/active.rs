use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::{
    error::RegistryError,
    model::{VersionCatalog, VersionId},
    observer::{RegistryEvent, RegistryObserver},
};

/// The version predictions use when they do not name one.
///
/// The value may point at a version that is not loaded yet; it is only ever
/// replaced by a version the catalog reports as present. Switches are
/// serialized so observers receive change events in commit order.
pub struct ActiveVersionController {
    current: RwLock<VersionId>,
    commit: Mutex<()>,
    catalog: VersionCatalog,
    observer: Arc<dyn RegistryObserver>,
}

impl ActiveVersionController {
    pub fn new(
        initial: VersionId,
        catalog: VersionCatalog,
        observer: Arc<dyn RegistryObserver>,
    ) -> Self {
        Self {
            current: RwLock::new(initial),
            commit: Mutex::new(()),
            catalog,
            observer,
        }
    }

    pub fn get(&self) -> VersionId {
        self.current.read().clone()
    }

    /// Switches to `version` and returns the value it replaced. Does not load
    /// anything; the first prediction against the new version does.
    pub fn set(&self, version: VersionId) -> Result<VersionId, RegistryError> {
        if !self.catalog.exists(&version) {
            return Err(RegistryError::VersionNotFound { version });
        }

        // Held through the notification; readers only wait on the swap itself.
        let _commit = self.commit.lock();
        let previous = std::mem::replace(&mut *self.current.write(), version.clone());
        self.observer.on_event(&RegistryEvent::ActiveVersionChanged {
            previous: previous.clone(),
            current: version,
        });
        Ok(previous)
    }
}
