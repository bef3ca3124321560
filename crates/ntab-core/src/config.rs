use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the directory persists an appended record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppendPath {
    /// Store and publish before returning.
    Synchronous,
    /// Update memory, return, and persist through the background worker.
    #[default]
    Deferred,
}

/// Background persist worker settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    /// Jobs that may wait in the queue before submissions are refused.
    pub queue_capacity: usize,
    /// Jobs that may run at once.
    pub max_in_flight: usize,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_in_flight: 4,
        }
    }
}

/// Per-controller settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Upper bound on name resolution during `load`.
    pub resolve_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            resolve_timeout: Duration::from_secs(10),
        }
    }
}

/// Table directory settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Location of the registry file.
    pub registry_path: PathBuf,
    pub resolve_timeout_secs: u64,
    pub append_path: AppendPath,
    pub persist: PersistConfig,
}

impl DirectoryConfig {
    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            resolve_timeout: Duration::from_secs(self.resolve_timeout_secs),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            registry_path: PathBuf::from("tables_registry.json"),
            resolve_timeout_secs: 10,
            append_path: AppendPath::default(),
            persist: PersistConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = DirectoryConfig::default();
        assert_eq!(c.registry_path, PathBuf::from("tables_registry.json"));
        assert_eq!(c.controller().resolve_timeout, Duration::from_secs(10));
        assert_eq!(c.append_path, AppendPath::Deferred);
        assert_eq!(c.persist.queue_capacity, 256);
        assert_eq!(c.persist.max_in_flight, 4);
    }

    #[test]
    fn parses_toml() {
        let c: DirectoryConfig = toml::from_str(
            r#"
            registry_path = "/var/lib/ntab/registry.json"
            append_path = "synchronous"

            [persist]
            max_in_flight = 1
            "#,
        )
        .unwrap();
        assert_eq!(c.registry_path, PathBuf::from("/var/lib/ntab/registry.json"));
        assert_eq!(c.append_path, AppendPath::Synchronous);
        assert_eq!(c.persist.max_in_flight, 1);
        assert_eq!(c.persist.queue_capacity, 256);
        assert_eq!(c.resolve_timeout_secs, 10);
    }
}
