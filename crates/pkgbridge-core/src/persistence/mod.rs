use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::{CoreError, CoreErrorKind, InstallationOptions, ManagerId};

pub type PersistenceResult<T> = Result<T, CoreError>;

pub trait MigrationStore: Send + Sync {
    fn current_version(&self) -> PersistenceResult<i64>;

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()>;
}

/// Remembered per-package installation options, keyed by `(manager, package_id)`.
pub trait InstallationOptionsStore: Send + Sync {
    fn load_options(
        &self,
        manager: ManagerId,
        package_id: &str,
    ) -> PersistenceResult<Option<InstallationOptions>>;

    fn save_options(
        &self,
        manager: ManagerId,
        package_id: &str,
        options: &InstallationOptions,
    ) -> PersistenceResult<()>;

    fn remove_options(&self, manager: ManagerId, package_id: &str) -> PersistenceResult<()>;
}

/// Keeps the serialized blobs, so a round trip exercises the same JSON as the
/// SQLite store.
#[derive(Debug, Default)]
pub struct InMemoryInstallationOptionsStore {
    blobs: Mutex<HashMap<(ManagerId, String), String>>,
}

impl InMemoryInstallationOptionsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|blobs| blobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl InstallationOptionsStore for InMemoryInstallationOptionsStore {
    fn load_options(
        &self,
        manager: ManagerId,
        package_id: &str,
    ) -> PersistenceResult<Option<InstallationOptions>> {
        let blobs = self.blobs.lock().map_err(|_| poisoned())?;
        blobs
            .get(&(manager, package_id.to_string()))
            .map(|raw| InstallationOptions::from_json(raw))
            .transpose()
    }

    fn save_options(
        &self,
        manager: ManagerId,
        package_id: &str,
        options: &InstallationOptions,
    ) -> PersistenceResult<()> {
        let raw = options.to_json()?;
        let mut blobs = self.blobs.lock().map_err(|_| poisoned())?;
        blobs.insert((manager, package_id.to_string()), raw);
        Ok(())
    }

    fn remove_options(&self, manager: ManagerId, package_id: &str) -> PersistenceResult<()> {
        let mut blobs = self.blobs.lock().map_err(|_| poisoned())?;
        blobs.remove(&(manager, package_id.to_string()));
        Ok(())
    }
}

fn poisoned() -> CoreError {
    CoreError {
        manager: None,
        task: None,
        action: None,
        kind: CoreErrorKind::StorageFailure,
        message: "installation options lock poisoned".to_string(),
    }
}
