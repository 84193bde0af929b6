use serde::{Deserialize, Serialize};

use crate::models::{Architecture, CoreError, CoreErrorKind, Package, PackageScope};

/// Per-operation knobs. The verdict classifiers mutate this in place when they
/// ask for an automatic retry.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallationOptions {
    pub skip_hash_check: bool,
    pub interactive: bool,
    pub run_as_administrator: bool,
    pub version: Option<String>,
    pub architecture: Option<Architecture>,
    pub scope: Option<PackageScope>,
    pub custom_parameters: Vec<String>,
    pub remove_data_on_uninstall: bool,
    pub pre_release: bool,
    pub custom_install_location: Option<String>,
}

impl InstallationOptions {
    /// The requested scope, or the scope the package was found in.
    pub fn effective_scope(&self, package: &Package) -> PackageScope {
        self.scope.unwrap_or(package.scope)
    }

    pub fn requested_version(&self) -> Option<&str> {
        self.version
            .as_deref()
            .map(str::trim)
            .filter(|version| !version.is_empty())
    }

    pub fn install_location(&self) -> Option<&str> {
        self.custom_install_location
            .as_deref()
            .map(str::trim)
            .filter(|location| !location.is_empty())
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|error| serialization_error(error.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        serde_json::from_str(raw).map_err(|error| serialization_error(error.to_string()))
    }
}

fn serialization_error(message: String) -> CoreError {
    CoreError {
        manager: None,
        task: None,
        action: None,
        kind: CoreErrorKind::ParseFailure,
        message: format!("invalid installation options payload: {message}"),
    }
}
