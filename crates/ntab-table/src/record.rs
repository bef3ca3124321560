use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One immutable entry in a table.
///
/// `version` is assigned when the record is appended and never changes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Record {
    pub version: u64,
    /// Content hash of the artifact this record describes.
    pub hash: String,
    pub magnet_link: String,
    pub file_name: String,
    pub file_size: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied fields of a record to append.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordDraft {
    pub hash: String,
    pub magnet_link: String,
    pub file_name: String,
    pub file_size: i64,
    pub description: String,
}

impl RecordDraft {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            ..Self::default()
        }
    }

    /// Seal the draft into a record with its version and creation time.
    pub fn into_record(self, version: u64, created_at: DateTime<Utc>) -> Record {
        Record {
            version,
            hash: self.hash,
            magnet_link: self.magnet_link,
            file_name: self.file_name,
            file_size: self.file_size,
            description: self.description,
            created_at,
        }
    }
}

/// Selects one record for removal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordSelector {
    /// Position in the record sequence.
    Index(usize),
    /// First record carrying this content hash.
    Hash(String),
    /// First record equal to this one.
    Value(Record),
}

impl fmt::Display for RecordSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordSelector::Index(i) => write!(f, "index {i}"),
            RecordSelector::Hash(h) => write!(f, "hash {h:?}"),
            RecordSelector::Value(r) => write!(f, "record v{} ({:?})", r.version, r.hash),
        }
    }
}
