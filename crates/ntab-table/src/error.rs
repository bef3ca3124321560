use thiserror::Error;

/// Errors from table data operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableDataError {
    /// A record payload did not parse as a record array.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A record index was outside `[0, len)`.
    #[error("record index {index} out of range for {len} records")]
    IndexOutOfRange { index: usize, len: usize },

    /// No record matched a removal selector.
    #[error("no record matches {0}")]
    RecordNotFound(String),

    /// The last record already carries the largest representable version.
    #[error("no version left after {0}")]
    VersionsExhausted(u64),

    /// The table could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// A snapshot could not be deserialized.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Result alias for table data operations.
pub type TableDataResult<T> = Result<T, TableDataError>;
