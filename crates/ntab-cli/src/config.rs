use std::path::{Path, PathBuf};

use anyhow::Context;
use ntab_core::DirectoryConfig;
use ntab_ipfs::IpfsConfig;
use serde::{Deserialize, Serialize};

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "ntab.toml";

/// Everything the `ntab` binary can be configured with.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NtabConfig {
    #[serde(flatten)]
    pub directory: DirectoryConfig,
    pub ipfs: IpfsConfig,
}

impl NtabConfig {
    /// Read `path`, or `ntab.toml` if it exists, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Apply command-line overrides.
    pub fn with_overrides(mut self, registry: Option<PathBuf>, api: Option<String>) -> Self {
        if let Some(registry) = registry {
            self.directory.registry_path = registry;
        }
        if let Some(api) = api {
            self.ipfs.api_url = api;
        }
        self
    }
}
