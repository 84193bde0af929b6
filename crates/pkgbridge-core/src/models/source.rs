use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::models::{ManagerId, SourceCapabilities};

/// Url given to sources that are referenced by name before their real location is known.
pub const PLACEHOLDER_SOURCE_URL: &str = "https://localhost/unknown-source";

/// A named repository or feed that belongs to exactly one manager.
///
/// Equality and hashing only look at `(manager, name, url)`; the optional
/// metadata never changes the identity of a source.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManagerSource {
    pub manager: ManagerId,
    pub name: String,
    pub url: String,
    pub package_count: Option<u64>,
    pub update_date: Option<String>,
}

impl ManagerSource {
    pub fn new(manager: ManagerId, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            manager,
            name: name.into(),
            url: url.into(),
            package_count: None,
            update_date: None,
        }
    }

    /// Attaches metadata, dropping whatever the manager cannot report.
    pub fn with_metadata(
        mut self,
        capabilities: &SourceCapabilities,
        package_count: Option<u64>,
        update_date: Option<String>,
    ) -> Self {
        self.package_count = package_count.filter(|_| capabilities.knows_package_count);
        self.update_date = update_date.filter(|_| capabilities.knows_update_date);
        self
    }

    pub fn has_placeholder_url(&self) -> bool {
        self.url == PLACEHOLDER_SOURCE_URL
    }
}

impl PartialEq for ManagerSource {
    fn eq(&self, other: &Self) -> bool {
        self.manager == other.manager && self.name == other.name && self.url == other.url
    }
}

impl Eq for ManagerSource {}

impl Hash for ManagerSource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.manager.hash(state);
        self.name.hash(state);
        self.url.hash(state);
    }
}

impl Display for ManagerSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.manager, self.name)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::ManagerSource;
    use crate::models::{ManagerId, SourceCapabilities};

    #[test]
    fn equality_ignores_metadata() {
        let bare = ManagerSource::new(ManagerId::Scoop, "main", "https://github.com/ScoopInstaller/Main");
        let counted = bare.clone().with_metadata(
            &SourceCapabilities {
                knows_package_count: true,
                knows_update_date: true,
                must_be_installed_as_admin: false,
            },
            Some(1200),
            Some("2024-05-01".to_string()),
        );

        assert_eq!(bare, counted);
        let set: HashSet<ManagerSource> = [bare, counted].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn metadata_is_dropped_when_manager_cannot_report_it() {
        let source = ManagerSource::new(ManagerId::Winget, "winget", "https://cdn.winget.microsoft.com/cache")
            .with_metadata(&SourceCapabilities::default(), Some(10), Some("today".to_string()));

        assert_eq!(source.package_count, None);
        assert_eq!(source.update_date, None);
    }

    #[test]
    fn sources_from_different_managers_differ() {
        let winget = ManagerSource::new(ManagerId::Winget, "main", "https://example.invalid");
        let scoop = ManagerSource::new(ManagerId::Scoop, "main", "https://example.invalid");
        assert_ne!(winget, scoop);
    }
}
