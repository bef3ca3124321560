use std::time::Duration;

/// Errors from content store and name service calls.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The backend could not be reached or refused the connection.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The requested blob, key, or name does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The call did not complete within its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The backend answered with an error for this request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The backend answered with something that could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// I/O error from a local backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;
