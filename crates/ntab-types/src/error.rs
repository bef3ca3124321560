use thiserror::Error;

/// Errors produced when parsing identifier types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("{kind} must not be empty")]
    Empty { kind: &'static str },

    #[error("invalid {kind}: {value:?} contains {reason}")]
    Invalid {
        kind: &'static str,
        value: String,
        reason: &'static str,
    },
}
