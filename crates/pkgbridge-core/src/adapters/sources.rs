use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use crate::models::{ManagerId, ManagerSource, PLACEHOLDER_SOURCE_URL, SourceCapabilities};

/// Name-to-source map owned by one backend.
///
/// Parsers often only see a source name. Unknown names are registered with a
/// default url so every package still carries a concrete source, and the
/// real url replaces the default once a source listing reports it.
#[derive(Debug)]
pub struct SourceRegistry {
    main: ManagerSource,
    capabilities: SourceCapabilities,
    default_url: &'static str,
    sources: RwLock<BTreeMap<String, ManagerSource>>,
}

impl SourceRegistry {
    pub fn new(main: ManagerSource, capabilities: SourceCapabilities) -> Self {
        let registry = Self {
            main,
            capabilities,
            default_url: PLACEHOLDER_SOURCE_URL,
            sources: RwLock::new(BTreeMap::new()),
        };
        registry.reset();
        registry
    }

    /// Url given to names seen before their listing.
    pub fn with_default_url(mut self, default_url: &'static str) -> Self {
        self.default_url = default_url;
        self
    }

    pub fn manager(&self) -> ManagerId {
        self.main.manager
    }

    pub fn main(&self) -> ManagerSource {
        self.main.clone()
    }

    pub fn capabilities(&self) -> &SourceCapabilities {
        &self.capabilities
    }

    pub fn get_or_default(&self, name: &str) -> ManagerSource {
        if let Some(existing) = self.get_if_exists(name) {
            return existing;
        }

        let source = ManagerSource::new(self.manager(), name, self.default_url);
        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        sources
            .entry(name.to_string())
            .or_insert(source)
            .clone()
    }

    pub fn get_if_exists(&self, name: &str) -> Option<ManagerSource> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registers `source`. An entry still carrying the default url is
    /// replaced; an entry with a real url keeps it and only takes metadata.
    pub fn add(&self, source: ManagerSource) {
        let source = self.filter_metadata(source);
        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        match sources.get_mut(&source.name) {
            Some(existing) if existing.url == self.default_url => *existing = source,
            Some(existing) => {
                if source.url == existing.url {
                    existing.package_count = source.package_count;
                    existing.update_date = source.update_date;
                }
            }
            None => {
                sources.insert(source.name.clone(), source);
            }
        }
    }

    pub fn remove(&self, name: &str) {
        if name == self.main.name {
            return;
        }
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    /// Forgets everything except the main source.
    pub fn reset(&self) {
        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        sources.clear();
        sources.insert(self.main.name.clone(), self.main.clone());
    }

    pub fn all(&self) -> Vec<ManagerSource> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn is_default_url(&self, source: &ManagerSource) -> bool {
        source.url == self.default_url
    }

    fn filter_metadata(&self, source: ManagerSource) -> ManagerSource {
        let package_count = source.package_count;
        let update_date = source.update_date.clone();
        source.with_metadata(&self.capabilities, package_count, update_date)
    }
}
