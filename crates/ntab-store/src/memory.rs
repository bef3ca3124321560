//! In-memory content store and name service.
//!
//! Both backends keep their data in `HashMap`s behind `RwLock`s and are
//! suitable for unit tests and single-process embedding. They can be told to
//! fail or to slow down, which is how the controller's best-effort paths are
//! exercised in tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use ntab_types::{Digest, NamePointer};

use crate::error::{ServiceError, ServiceResult};
use crate::traits::{ContentStore, NameKey, NameService};

/// In-memory, HashMap-based content store.
pub struct InMemoryContentStore {
    blobs: RwLock<HashMap<Digest, Vec<u8>>>,
    offline: AtomicBool,
    puts: AtomicUsize,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
            puts: AtomicUsize::new(0),
        }
    }

    /// Number of distinct blobs stored.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().expect("lock poisoned").is_empty()
    }

    /// Number of successful `put` calls, including deduplicated ones.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail with [`ServiceError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> ServiceResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("content store is offline".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn put(&self, data: &[u8]) -> ServiceResult<Digest> {
        self.check_online()?;
        let digest = Digest::of(data);
        let mut blobs = self.blobs.write().expect("lock poisoned");
        blobs.entry(digest.clone()).or_insert_with(|| data.to_vec());
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(digest)
    }

    async fn get(&self, digest: &Digest) -> ServiceResult<Vec<u8>> {
        self.check_online()?;
        let blobs = self.blobs.read().expect("lock poisoned");
        blobs
            .get(digest)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("blob {digest}")))
    }
}

impl std::fmt::Debug for InMemoryContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryContentStore")
            .field("blob_count", &self.len())
            .finish()
    }
}

/// In-memory name service.
///
/// Pointers are derived deterministically from key names. Publishes become
/// visible to `resolve` as soon as they complete; configurable delays model
/// slow propagation.
#[derive(Debug)]
pub struct InMemoryNameService {
    keys: RwLock<BTreeMap<String, NamePointer>>,
    records: RwLock<HashMap<NamePointer, Digest>>,
    publish_fails: AtomicBool,
    resolve_fails: AtomicBool,
    publish_delay: Mutex<Duration>,
    resolve_delay: Mutex<Duration>,
    key_delay: Mutex<Duration>,
    generated: AtomicUsize,
    published: AtomicUsize,
}

impl InMemoryNameService {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(BTreeMap::new()),
            records: RwLock::new(HashMap::new()),
            publish_fails: AtomicBool::new(false),
            resolve_fails: AtomicBool::new(false),
            publish_delay: Mutex::new(Duration::ZERO),
            resolve_delay: Mutex::new(Duration::ZERO),
            key_delay: Mutex::new(Duration::ZERO),
            generated: AtomicUsize::new(0),
            published: AtomicUsize::new(0),
        }
    }

    /// Make publishes fail with [`ServiceError::Unavailable`].
    pub fn fail_publishes(&self, fail: bool) {
        self.publish_fails.store(fail, Ordering::SeqCst);
    }

    /// Make resolutions fail with [`ServiceError::Unavailable`].
    pub fn fail_resolves(&self, fail: bool) {
        self.resolve_fails.store(fail, Ordering::SeqCst);
    }

    /// Delay every publish by `delay` before it takes effect.
    pub fn set_publish_delay(&self, delay: Duration) {
        *self.publish_delay.lock().expect("lock poisoned") = delay;
    }

    /// Delay every resolution by `delay`. A delay longer than the caller's
    /// timeout produces [`ServiceError::Timeout`].
    pub fn set_resolve_delay(&self, delay: Duration) {
        *self.resolve_delay.lock().expect("lock poisoned") = delay;
    }

    /// Delay every key listing and key generation by `delay`.
    pub fn set_key_delay(&self, delay: Duration) {
        *self.key_delay.lock().expect("lock poisoned") = delay;
    }

    async fn key_pause(&self) {
        let delay = *self.key_delay.lock().expect("lock poisoned");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Number of keys generated (not adopted) so far.
    pub fn generated_key_count(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }

    /// Number of publishes that completed.
    pub fn publish_count(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }

    /// The digest a pointer currently resolves to, without delay or faults.
    pub fn current(&self, pointer: &NamePointer) -> Option<Digest> {
        self.records
            .read()
            .expect("lock poisoned")
            .get(pointer)
            .cloned()
    }
}

impl Default for InMemoryNameService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NameService for InMemoryNameService {
    async fn list_keys(&self) -> ServiceResult<Vec<NameKey>> {
        self.key_pause().await;
        let keys = self.keys.read().expect("lock poisoned");
        Ok(keys
            .iter()
            .map(|(name, pointer)| NameKey {
                name: name.clone(),
                pointer: pointer.clone(),
            })
            .collect())
    }

    async fn generate_key(&self, name: &str) -> ServiceResult<NameKey> {
        self.key_pause().await;
        let mut keys = self.keys.write().expect("lock poisoned");
        if keys.contains_key(name) {
            return Err(ServiceError::Rejected(format!("key {name:?} already exists")));
        }
        let pointer = NamePointer::derive(name);
        keys.insert(name.to_string(), pointer.clone());
        self.generated.fetch_add(1, Ordering::SeqCst);
        Ok(NameKey {
            name: name.to_string(),
            pointer,
        })
    }

    async fn publish(&self, key_name: &str, digest: &Digest) -> ServiceResult<NamePointer> {
        let delay = *self.publish_delay.lock().expect("lock poisoned");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.publish_fails.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("name publish failed".into()));
        }
        let pointer = self
            .keys
            .read()
            .expect("lock poisoned")
            .get(key_name)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("key {key_name:?}")))?;
        self.records
            .write()
            .expect("lock poisoned")
            .insert(pointer.clone(), digest.clone());
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(pointer)
    }

    async fn resolve(&self, pointer: &NamePointer, timeout: Duration) -> ServiceResult<Digest> {
        let delay = *self.resolve_delay.lock().expect("lock poisoned");
        if !delay.is_zero() {
            if delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(ServiceError::Timeout {
                    operation: "resolve",
                    after: timeout,
                });
            }
            tokio::time::sleep(delay).await;
        }
        if self.resolve_fails.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("name resolution failed".into()));
        }
        self.current(pointer)
            .ok_or_else(|| ServiceError::NotFound(format!("no record published for {pointer}")))
    }
}
