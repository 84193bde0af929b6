use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::TaskType;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerId {
    Winget,
    Chocolatey,
    Scoop,
    Pip,
    Npm,
    DotnetTool,
    PowerShell,
}

impl ManagerId {
    pub const ALL: [ManagerId; 7] = [
        ManagerId::Winget,
        ManagerId::Chocolatey,
        ManagerId::Scoop,
        ManagerId::Pip,
        ManagerId::Npm,
        ManagerId::DotnetTool,
        ManagerId::PowerShell,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Winget => "winget",
            Self::Chocolatey => "chocolatey",
            Self::Scoop => "scoop",
            Self::Pip => "pip",
            Self::Npm => "npm",
            Self::DotnetTool => "dotnet_tool",
            Self::PowerShell => "powershell",
        }
    }
}

impl Display for ManagerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ManagerId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "winget" => Ok(Self::Winget),
            "chocolatey" | "choco" => Ok(Self::Chocolatey),
            "scoop" => Ok(Self::Scoop),
            "pip" => Ok(Self::Pip),
            "npm" => Ok(Self::Npm),
            "dotnet_tool" | "dotnet" => Ok(Self::DotnetTool),
            "powershell" => Ok(Self::PowerShell),
            _ => Err(format!("unknown manager id '{value}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ManagerAction {
    Detect,
    Refresh,
    Search,
    ListInstalled,
    ListOutdated,
    Details,
    Versions,
    Install,
    Update,
    Uninstall,
    ListSources,
    AddSource,
    RemoveSource,
}

impl ManagerAction {
    pub fn safety(self) -> ActionSafety {
        match self {
            Self::Install
            | Self::Update
            | Self::Uninstall
            | Self::AddSource
            | Self::RemoveSource => ActionSafety::Mutating,
            _ => ActionSafety::ReadOnly,
        }
    }

    pub fn task_type(self) -> TaskType {
        match self {
            Self::Detect => TaskType::Detection,
            Self::Refresh => TaskType::Refresh,
            Self::Search | Self::ListInstalled | Self::ListOutdated => TaskType::Search,
            Self::Details | Self::Versions => TaskType::Details,
            Self::Install => TaskType::Install,
            Self::Update => TaskType::Update,
            Self::Uninstall => TaskType::Uninstall,
            Self::ListSources | Self::AddSource | Self::RemoveSource => TaskType::Sources,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ActionSafety {
    ReadOnly,
    Mutating,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    X86,
    X64,
    Arm,
    Arm64,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SourceCapabilities {
    pub knows_package_count: bool,
    pub knows_update_date: bool,
    pub must_be_installed_as_admin: bool,
}

/// Static per-manager feature flags. Fixed at construction and never mutated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ManagerCapabilities {
    pub can_run_as_admin: bool,
    pub can_skip_integrity_checks: bool,
    pub can_run_interactively: bool,
    pub can_remove_data_on_uninstall: bool,
    pub supports_custom_versions: bool,
    pub supports_custom_architectures: bool,
    pub supported_architectures: &'static [Architecture],
    pub supports_custom_scopes: bool,
    pub supports_pre_release: bool,
    pub supports_custom_locations: bool,
    pub supports_custom_sources: bool,
    pub sources: SourceCapabilities,
}

impl ManagerCapabilities {
    pub const NONE: ManagerCapabilities = ManagerCapabilities {
        can_run_as_admin: false,
        can_skip_integrity_checks: false,
        can_run_interactively: false,
        can_remove_data_on_uninstall: false,
        supports_custom_versions: false,
        supports_custom_architectures: false,
        supported_architectures: &[],
        supports_custom_scopes: false,
        supports_pre_release: false,
        supports_custom_locations: false,
        supports_custom_sources: false,
        sources: SourceCapabilities {
            knows_package_count: false,
            knows_update_date: false,
            must_be_installed_as_admin: false,
        },
    };
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ManagerProperties {
    pub id: ManagerId,
    pub name: &'static str,
    pub description: &'static str,
    pub executable_friendly_name: &'static str,
    pub executable_call_args: &'static [&'static str],
    pub install_verb: &'static str,
    pub update_verb: &'static str,
    pub uninstall_verb: &'static str,
}

impl ManagerProperties {
    pub fn disable_setting_key(&self) -> String {
        format!("Disable{}", self.name)
    }

    pub fn executable_setting_key(&self) -> String {
        format!("{}ExecutablePath", self.name)
    }
}

/// Runtime state refreshed every time a manager initializes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ManagerStatus {
    pub found: bool,
    pub executable_path: Option<PathBuf>,
    pub version: Option<String>,
}

impl ManagerStatus {
    pub fn missing() -> Self {
        Self::default()
    }
}
