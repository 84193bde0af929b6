use serde::{Deserialize, Serialize};

use crate::models::{ManagerId, Package};

/// Extended metadata for one package. Only the identity fields are guaranteed.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PackageDetails {
    pub manager: Option<ManagerId>,
    pub id: String,
    pub name: String,
    pub version: String,
    pub source_name: String,
    pub description: Option<String>,
    pub publisher: Option<String>,
    pub author: Option<String>,
    pub homepage_url: Option<String>,
    pub license: Option<String>,
    pub license_url: Option<String>,
    pub installer_url: Option<String>,
    pub installer_hash: Option<String>,
    pub installer_type: Option<String>,
    pub update_date: Option<String>,
    pub release_notes: Option<String>,
    pub release_notes_url: Option<String>,
    pub manifest_url: Option<String>,
    pub tags: Vec<String>,
}

impl PackageDetails {
    pub fn for_package(package: &Package) -> Self {
        Self {
            manager: Some(package.manager()),
            id: package.id.clone(),
            name: package.name.clone(),
            version: package.version.clone(),
            source_name: package.source.name.clone(),
            ..Self::default()
        }
    }

    /// True when nothing beyond the identity fields was filled in.
    pub fn is_identity_only(&self) -> bool {
        self.description.is_none()
            && self.publisher.is_none()
            && self.author.is_none()
            && self.homepage_url.is_none()
            && self.license.is_none()
            && self.license_url.is_none()
            && self.installer_url.is_none()
            && self.installer_hash.is_none()
            && self.installer_type.is_none()
            && self.update_date.is_none()
            && self.release_notes.is_none()
            && self.release_notes_url.is_none()
            && self.manifest_url.is_none()
            && self.tags.is_empty()
    }
}
