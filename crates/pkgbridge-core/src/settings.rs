use std::collections::HashMap;
use std::sync::RwLock;

/// Read-only view of user settings.
///
/// Keys follow the desktop convention: `Disable<ManagerName>` turns a manager
/// off, `<ManagerName>ExecutablePath` overrides executable discovery.
pub trait SettingsStore: Send + Sync {
    /// Missing or unreadable keys read as `false`.
    fn get_bool(&self, key: &str) -> bool;

    fn get_string(&self, key: &str) -> Option<String>;
}

pub(crate) fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[derive(Debug, Default)]
pub struct InMemorySettings {
    values: RwLock<HashMap<String, String>>,
}

impl InMemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.into(), value.into());
        }
    }

    pub fn set_bool(&self, key: impl Into<String>, value: bool) {
        self.set(key, if value { "true" } else { "false" });
    }

    pub fn remove(&self, key: &str) {
        if let Ok(mut values) = self.values.write() {
            values.remove(key);
        }
    }
}

impl SettingsStore for InMemorySettings {
    fn get_bool(&self, key: &str) -> bool {
        self.get_string(key).is_some_and(|value| parse_bool(&value))
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.values.read().ok()?.get(key).cloned()
    }
}
