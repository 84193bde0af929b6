use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::models::{ManagerId, ManagerSource};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageScope {
    #[default]
    User,
    Global,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageTag {
    #[default]
    Default,
    AlreadyInstalled,
    Upgradable,
    Pinned,
    OnQueue,
    BeingProcessed,
    Failed,
}

impl PackageTag {
    fn as_u8(self) -> u8 {
        match self {
            Self::Default => 0,
            Self::AlreadyInstalled => 1,
            Self::Upgradable => 2,
            Self::Pinned => 3,
            Self::OnQueue => 4,
            Self::BeingProcessed => 5,
            Self::Failed => 6,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::AlreadyInstalled,
            2 => Self::Upgradable,
            3 => Self::Pinned,
            4 => Self::OnQueue,
            5 => Self::BeingProcessed,
            6 => Self::Failed,
            _ => Self::Default,
        }
    }
}

/// Key under which the identity caches store a package.
///
/// Sources are matched by name only: a listing that later fills in a
/// source's url must not split one package into two.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PackageIdentity {
    pub manager: ManagerId,
    pub source_name: String,
    pub id: String,
}

/// One package row as reported by a manager.
///
/// Identity fields are plain values. The tag and the checked flag are
/// interior-mutable so that a shared instance can carry UI state across
/// refreshes.
#[derive(Debug)]
pub struct Package {
    pub name: String,
    pub id: String,
    pub version: String,
    pub new_version: Option<String>,
    pub source: ManagerSource,
    pub scope: PackageScope,
    tag: AtomicU8,
    checked: AtomicBool,
}

impl Package {
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        version: impl Into<String>,
        source: ManagerSource,
        scope: PackageScope,
    ) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            version: version.into(),
            new_version: None,
            source,
            scope,
            tag: AtomicU8::new(PackageTag::Default.as_u8()),
            checked: AtomicBool::new(false),
        }
    }

    pub fn upgradable(
        name: impl Into<String>,
        id: impl Into<String>,
        version: impl Into<String>,
        new_version: impl Into<String>,
        source: ManagerSource,
        scope: PackageScope,
    ) -> Self {
        let mut package = Self::new(name, id, version, source, scope);
        package.new_version = Some(new_version.into());
        package
    }

    pub fn manager(&self) -> ManagerId {
        self.source.manager
    }

    pub fn identity(&self) -> PackageIdentity {
        PackageIdentity {
            manager: self.source.manager,
            source_name: self.source.name.clone(),
            id: self.id.clone(),
        }
    }

    /// Identity equality: same manager, source name and id, regardless of
    /// version, source url or instance.
    pub fn is_same_package(&self, other: &Package) -> bool {
        self.source.manager == other.source.manager
            && self.source.name == other.source.name
            && self.id == other.id
    }

    pub fn is_upgradable(&self) -> bool {
        self.new_version.is_some()
    }

    pub fn tag(&self) -> PackageTag {
        PackageTag::from_u8(self.tag.load(Ordering::SeqCst))
    }

    pub fn set_tag(&self, tag: PackageTag) {
        self.tag.store(tag.as_u8(), Ordering::SeqCst);
    }

    pub fn is_checked(&self) -> bool {
        self.checked.load(Ordering::SeqCst)
    }

    pub fn set_checked(&self, checked: bool) {
        self.checked.store(checked, Ordering::SeqCst);
    }
}

impl Clone for Package {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            id: self.id.clone(),
            version: self.version.clone(),
            new_version: self.new_version.clone(),
            source: self.source.clone(),
            scope: self.scope,
            tag: AtomicU8::new(self.tag.load(Ordering::SeqCst)),
            checked: AtomicBool::new(self.is_checked()),
        }
    }
}
