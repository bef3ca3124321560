use std::time::Duration;

use ntab_store::ServiceError;
use ntab_table::TableDataError;
use ntab_types::{NamePointer, TableId};
use thiserror::Error;

/// Errors surfaced by table controllers and the table directory.
#[derive(Debug, Error)]
pub enum TableError {
    /// No table with this identifier is known.
    #[error("table not found: {0}")]
    NotFound(String),

    /// Table names must be non-empty.
    #[error("invalid table name: {0:?}")]
    InvalidName(String),

    /// Another table already uses this name.
    #[error("table name already in use: {0}")]
    Conflict(String),

    /// A record payload did not parse.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("record index {index} out of range for {len} records")]
    IndexOutOfRange { index: usize, len: usize },

    /// No record matched a removal selector.
    #[error("no record matches {0}")]
    RecordNotFound(String),

    /// The table's last record holds the largest possible version.
    #[error("no record version left after {0}")]
    VersionsExhausted(u64),

    /// The table has never had a naming key, so there is nothing to resolve.
    #[error("table {0} has no name pointer")]
    NoNamePointer(TableId),

    #[error("resolving {pointer} timed out after {after:?}")]
    ResolutionTimeout { pointer: NamePointer, after: Duration },

    /// Fetched snapshot bytes did not decode into this table.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    /// The content store or name service failed.
    #[error("upstream unavailable: {0}")]
    Upstream(#[from] ServiceError),

    /// The registry file could not be read or written.
    #[error("registry error: {0}")]
    Registry(String),

    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The background persist queue is full.
    #[error("background persist queue is full")]
    PersistQueueFull,

    /// The background persist worker has been shut down.
    #[error("background persist worker is shut down")]
    PersisterClosed,
}

impl From<TableDataError> for TableError {
    fn from(err: TableDataError) -> Self {
        match err {
            TableDataError::MalformedPayload(msg) => TableError::MalformedPayload(msg),
            TableDataError::IndexOutOfRange { index, len } => {
                TableError::IndexOutOfRange { index, len }
            }
            TableDataError::RecordNotFound(what) => TableError::RecordNotFound(what),
            TableDataError::VersionsExhausted(last) => TableError::VersionsExhausted(last),
            TableDataError::Encode(msg) => TableError::Encode(msg),
            TableDataError::Decode(msg) => TableError::Decode(msg),
        }
    }
}

/// Result alias for controller and directory operations.
pub type TableResult<T> = Result<T, TableError>;
