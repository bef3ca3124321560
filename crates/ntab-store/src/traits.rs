use std::time::Duration;

use async_trait::async_trait;
use ntab_types::{Digest, NamePointer};

use crate::error::ServiceResult;

/// Content-addressed blob store.
///
/// Implementations must satisfy:
/// - Blobs are immutable once written. The same bytes always produce the same
///   digest, so `put` is idempotent.
/// - A blob is either stored whole or not at all; partial writes are never
///   observable through `get`.
/// - All failures are propagated.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store a blob and return its content address.
    async fn put(&self, data: &[u8]) -> ServiceResult<Digest>;

    /// Fetch a blob by content address.
    ///
    /// Returns [`ServiceError::NotFound`](crate::ServiceError::NotFound) if the
    /// blob is unknown to the store.
    async fn get(&self, digest: &Digest) -> ServiceResult<Vec<u8>>;
}

/// A key known to the name service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameKey {
    /// Local handle used when publishing.
    pub name: String,
    /// Public name the key publishes under.
    pub pointer: NamePointer,
}

/// Mutable-pointer layer over a content store.
///
/// Publishing may take many seconds and may fail; the previous pointer stays
/// resolvable when it does. Resolution may return a stale digest while a
/// publish is still propagating.
#[async_trait]
pub trait NameService: Send + Sync {
    /// List every key the service holds.
    async fn list_keys(&self) -> ServiceResult<Vec<NameKey>>;

    /// Generate a new key with the given local name.
    async fn generate_key(&self, name: &str) -> ServiceResult<NameKey>;

    /// Point the key's name at `digest`. Returns the name that was updated.
    async fn publish(&self, key_name: &str, digest: &Digest) -> ServiceResult<NamePointer>;

    /// Resolve a name to the digest it currently points at, giving up after
    /// `timeout`.
    async fn resolve(&self, pointer: &NamePointer, timeout: Duration) -> ServiceResult<Digest>;

    /// Find the key with the given local name, if any.
    async fn find_key(&self, name: &str) -> ServiceResult<Option<NameKey>> {
        let keys = self.list_keys().await?;
        Ok(keys.into_iter().find(|k| k.name == name))
    }
}
