use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use crate::models::{Package, PackageIdentity};

/// Canonical package instances for one logical package set.
///
/// The first instance seen under an identity wins. Later parses of the same
/// `(source, id)` get that instance back, so tag and checked state set on it
/// survive refreshes.
#[derive(Debug, Default)]
pub struct IdentityCache {
    packages: Mutex<HashMap<PackageIdentity, Arc<Package>>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached instance for `package`'s identity, registering
    /// `package` when the identity is new.
    pub fn reconcile_one(&self, package: Package) -> Arc<Package> {
        let mut packages = self.packages.lock().unwrap_or_else(PoisonError::into_inner);
        packages
            .entry(package.identity())
            .or_insert_with(|| Arc::new(package))
            .clone()
    }

    /// Reconciles a parse batch, keeping its order. Duplicates inside the
    /// batch collapse onto one instance.
    pub fn reconcile(&self, batch: Vec<Package>) -> Vec<Arc<Package>> {
        let mut packages = self.packages.lock().unwrap_or_else(PoisonError::into_inner);
        let mut seen = HashSet::with_capacity(batch.len());
        let mut result = Vec::with_capacity(batch.len());
        for package in batch {
            let identity = package.identity();
            if !seen.insert(identity.clone()) {
                continue;
            }
            let canonical = packages
                .entry(identity)
                .or_insert_with(|| Arc::new(package))
                .clone();
            result.push(canonical);
        }
        result
    }

    pub fn get(&self, identity: &PackageIdentity) -> Option<Arc<Package>> {
        self.packages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    /// Identity equality, not instance identity.
    pub fn contains(&self, package: &Package) -> bool {
        self.packages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&package.identity())
    }

    pub fn remove(&self, identity: &PackageIdentity) -> Option<Arc<Package>> {
        self.packages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity)
    }

    pub fn clear(&self) {
        self.packages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.packages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Arc<Package>> {
        self.packages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

/// The three independent package sets. A package may be canonical in more
/// than one of them as different instances.
#[derive(Debug, Default)]
pub struct PackageCaches {
    pub installed: IdentityCache,
    pub available: IdentityCache,
    pub upgradable: IdentityCache,
}

impl PackageCaches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_all(&self) {
        self.installed.clear();
        self.available.clear();
        self.upgradable.clear();
    }
}
