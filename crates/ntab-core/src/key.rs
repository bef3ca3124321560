//! Naming key lifecycle.
//!
//! A table's key moves `NoKey -> Ensured -> Published(d) -> Published(d') ...`.
//! The first transition happens at most once per table: an existing key with
//! the table's key name is adopted instead of generating a duplicate, which
//! makes rebuilding a controller after a restart safe to repeat.

use ntab_store::{NameService, ServiceError, ServiceResult};
use ntab_types::{Digest, NamePointer};
use tracing::{debug, info};

/// Where a table stands with its naming key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyState {
    /// No key has been obtained yet.
    NoKey,
    /// A key exists; nothing has been published by this process.
    Ensured { pointer: NamePointer },
    /// The pointer was last successfully published at `digest`.
    Published { pointer: NamePointer, digest: Digest },
}

impl KeyState {
    pub fn pointer(&self) -> Option<&NamePointer> {
        match self {
            KeyState::NoKey => None,
            KeyState::Ensured { pointer } | KeyState::Published { pointer, .. } => Some(pointer),
        }
    }

    /// Digest of the last completed publish.
    pub fn published(&self) -> Option<&Digest> {
        match self {
            KeyState::Published { digest, .. } => Some(digest),
            _ => None,
        }
    }
}

/// Look up the key named `key_name`, generating it only if it does not exist.
///
/// If generation is refused because a concurrent caller created the key in
/// the meantime, the newly listed key is adopted.
pub async fn ensure_key(names: &dyn NameService, key_name: &str) -> ServiceResult<NamePointer> {
    if let Some(existing) = names.find_key(key_name).await? {
        debug!(key = key_name, pointer = %existing.pointer, "adopting existing naming key");
        return Ok(existing.pointer);
    }
    match names.generate_key(key_name).await {
        Ok(key) => {
            info!(key = key_name, pointer = %key.pointer, "generated naming key");
            Ok(key.pointer)
        }
        Err(err @ ServiceError::Rejected(_)) => match names.find_key(key_name).await? {
            Some(existing) => Ok(existing.pointer),
            None => Err(err),
        },
        Err(err) => Err(err),
    }
}
