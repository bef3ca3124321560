//! Durable table registry.
//!
//! The registry is a single JSON file mapping table ids to the naming data
//! needed to rebuild a controller after a restart:
//!
//! ```json
//! {"tables": {"<id>": {"id": "…", "name": "…", "keyName": "…", "namePointer": "k51…"}}}
//! ```
//!
//! It is rewritten in full after every mutating directory operation. Writes
//! go to `<path>.tmp` first and are renamed into place, so a crash never
//! leaves a torn file.
//!
//! Entries are read one at a time: an entry that does not parse is logged
//! and skipped, and the rest of the registry still loads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ntab_types::{NamePointer, TableId};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{TableError, TableResult};

/// What the registry remembers about one table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub id: TableId,
    pub name: String,
    /// Name service key handle.
    pub key_name: String,
    #[serde(
        default,
        alias = "ipnsName",
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub name_pointer: Option<NamePointer>,
}

impl RegistryEntry {
    /// An entry with no name pointer whose key is named after the table id.
    pub fn new(id: TableId, name: impl Into<String>) -> Self {
        Self {
            key_name: id.to_string(),
            id,
            name: name.into(),
            name_pointer: None,
        }
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<NamePointer>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.filter(|s| !s.is_empty()) {
        Some(s) => NamePointer::new(s)
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

/// On-disk registry document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub tables: BTreeMap<TableId, RegistryEntry>,
}

/// The registry document before its entries are checked.
#[derive(Deserialize)]
struct RawRegistryFile {
    #[serde(default)]
    tables: BTreeMap<String, serde_json::Value>,
}

/// Handle on the registry file.
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Registry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole registry. A missing file is an empty registry.
    pub async fn load(&self) -> TableResult<RegistryFile> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no registry file; starting empty");
                return Ok(RegistryFile::default());
            }
            Err(err) => return Err(err.into()),
        };
        let raw: RawRegistryFile = serde_json::from_slice(&bytes)
            .map_err(|e| TableError::Registry(format!("{}: {e}", self.path.display())))?;

        let mut file = RegistryFile::default();
        for (key, value) in raw.tables {
            match serde_json::from_value::<RegistryEntry>(value) {
                Ok(entry) => {
                    file.tables.insert(entry.id.clone(), entry);
                }
                Err(err) => warn!(
                    path = %self.path.display(),
                    entry = %key,
                    error = %err,
                    "skipping unreadable registry entry"
                ),
            }
        }
        Ok(file)
    }

    /// Replace the registry file atomically.
    pub async fn save(&self, file: &RegistryFile) -> TableResult<()> {
        self.save_with(|| file.clone()).await
    }

    /// Like [`save`](Self::save), but builds the document after taking the
    /// write lock, so concurrent savers always land the newest contents last.
    pub async fn save_with<F>(&self, build: F) -> TableResult<()>
    where
        F: FnOnce() -> RegistryFile,
    {
        let _guard = self.write_lock.lock().await;
        let file = build();
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| TableError::Registry(format!("encode: {e}")))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.tmp_path();
        {
            let mut out = tokio::fs::File::create(&tmp).await?;
            out.write_all(&json).await?;
            out.sync_all().await?;
        }
        if let Err(err) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        debug!(path = %self.path.display(), tables = file.tables.len(), "registry saved");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}
