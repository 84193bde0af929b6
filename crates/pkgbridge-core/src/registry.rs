use std::sync::Arc;

use crate::adapters::{
    BackendContext, CHOCOLATEY_CAPABILITIES, CHOCOLATEY_PROPERTIES, ChocolateyBackend,
    DOTNET_CAPABILITIES, DOTNET_PROPERTIES, DotnetBackend, ManagerBackend, NPM_CAPABILITIES,
    NPM_PROPERTIES, NpmBackend, PIP_CAPABILITIES, PIP_PROPERTIES, POWERSHELL_CAPABILITIES,
    POWERSHELL_PROPERTIES, PipBackend, PowerShellBackend, SCOOP_CAPABILITIES, SCOOP_PROPERTIES,
    ScoopBackend, WINGET_CAPABILITIES, WINGET_PROPERTIES, WingetBackend,
};
use crate::models::{ManagerCapabilities, ManagerId, ManagerProperties};

/// Static facts about one manager, available without constructing it.
#[derive(Clone, Copy, Debug)]
pub struct ManagerDescriptor {
    pub id: ManagerId,
    pub properties: &'static ManagerProperties,
    pub capabilities: &'static ManagerCapabilities,
}

impl ManagerDescriptor {
    pub fn display_name(&self) -> &'static str {
        self.properties.name
    }

    pub fn supports_sources(&self) -> bool {
        self.capabilities.supports_custom_sources
    }
}

const ALL_MANAGERS: [ManagerDescriptor; 7] = [
    ManagerDescriptor {
        id: ManagerId::Winget,
        properties: &WINGET_PROPERTIES,
        capabilities: &WINGET_CAPABILITIES,
    },
    ManagerDescriptor {
        id: ManagerId::Chocolatey,
        properties: &CHOCOLATEY_PROPERTIES,
        capabilities: &CHOCOLATEY_CAPABILITIES,
    },
    ManagerDescriptor {
        id: ManagerId::Scoop,
        properties: &SCOOP_PROPERTIES,
        capabilities: &SCOOP_CAPABILITIES,
    },
    ManagerDescriptor {
        id: ManagerId::Pip,
        properties: &PIP_PROPERTIES,
        capabilities: &PIP_CAPABILITIES,
    },
    ManagerDescriptor {
        id: ManagerId::Npm,
        properties: &NPM_PROPERTIES,
        capabilities: &NPM_CAPABILITIES,
    },
    ManagerDescriptor {
        id: ManagerId::DotnetTool,
        properties: &DOTNET_PROPERTIES,
        capabilities: &DOTNET_CAPABILITIES,
    },
    ManagerDescriptor {
        id: ManagerId::PowerShell,
        properties: &POWERSHELL_PROPERTIES,
        capabilities: &POWERSHELL_CAPABILITIES,
    },
];

pub fn managers() -> &'static [ManagerDescriptor] {
    &ALL_MANAGERS
}

pub fn manager(id: ManagerId) -> Option<&'static ManagerDescriptor> {
    ALL_MANAGERS.iter().find(|descriptor| descriptor.id == id)
}

/// Case-insensitive lookup by id alias or display name.
pub fn find_manager(name: &str) -> Option<&'static ManagerDescriptor> {
    if let Ok(id) = name.parse::<ManagerId>() {
        return manager(id);
    }
    ALL_MANAGERS
        .iter()
        .find(|descriptor| descriptor.properties.name.eq_ignore_ascii_case(name.trim()))
}

pub fn build_backend(id: ManagerId, context: BackendContext) -> Arc<dyn ManagerBackend> {
    match id {
        ManagerId::Winget => Arc::new(WingetBackend::new(context)),
        ManagerId::Chocolatey => Arc::new(ChocolateyBackend::new(context)),
        ManagerId::Scoop => Arc::new(ScoopBackend::new(context)),
        ManagerId::Pip => Arc::new(PipBackend::new(context)),
        ManagerId::Npm => Arc::new(NpmBackend::new(context)),
        ManagerId::DotnetTool => Arc::new(DotnetBackend::new(context)),
        ManagerId::PowerShell => Arc::new(PowerShellBackend::new(context)),
    }
}

/// One backend per known manager, in registry order.
pub fn build_backends(context: &BackendContext) -> Vec<Arc<dyn ManagerBackend>> {
    ALL_MANAGERS
        .iter()
        .map(|descriptor| build_backend(descriptor.id, context.clone()))
        .collect()
}
