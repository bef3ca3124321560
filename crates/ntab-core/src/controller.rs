use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use ntab_store::{ContentStore, NameService, ServiceError};
use ntab_table::{parse_payload, Record, RecordDraft, RecordSelector, Table};
use ntab_types::{Digest, NamePointer, TableId};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::{TableError, TableResult};
use crate::key::{ensure_key, KeyState};
use crate::policy::PublishPolicy;
use crate::registry::RegistryEntry;

/// The external services every controller talks to.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn ContentStore>,
    pub names: Arc<dyn NameService>,
}

impl Services {
    pub fn new(store: Arc<dyn ContentStore>, names: Arc<dyn NameService>) -> Self {
        Self { store, names }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

/// Parameters for a new table.
#[derive(Clone, Debug)]
pub struct NewTable {
    pub id: TableId,
    pub name: String,
    pub description: String,
    /// Initial record array as JSON. Must parse if present.
    pub payload: Option<String>,
}

/// Fields to change in [`TableController::update`]. `None` and empty strings
/// leave the field as it is.
#[derive(Clone, Debug, Default)]
pub struct TableUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub payload: Option<String>,
}

impl TableUpdate {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// The new name, if this update changes it.
    pub fn new_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }
}

/// Outcome of storing (and possibly publishing) a snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistReceipt {
    /// Content address of the stored snapshot.
    pub digest: Digest,
    /// In-memory revision the snapshot was taken from.
    pub revision: u64,
    /// Whether the name pointer now points at `digest`.
    pub published: bool,
}

struct ControllerState {
    table: Table,
    key: KeyState,
    /// Bumped on every in-memory change.
    revision: u64,
    /// Newest revision whose publish completed.
    published_revision: Option<u64>,
}

#[derive(Clone)]
struct CachedView {
    table: Arc<Table>,
    key: KeyState,
}

/// Owns one table and keeps its memory, stored snapshots and name pointer
/// reconciled.
///
/// Mutations are serialized by an async mutex that is held across any
/// synchronous store or publish call. Readers go through a copy-on-write view
/// that is swapped after each change, so [`snapshot`](Self::snapshot) never
/// waits on the network.
///
/// Publishes are serialized by a second gate, always taken before the state
/// lock, so two publishes of one table never complete out of order.
pub struct TableController {
    id: TableId,
    key_name: String,
    services: Services,
    config: ControllerConfig,
    state: Mutex<ControllerState>,
    publish_gate: Mutex<()>,
    view: RwLock<CachedView>,
    persist_queued: AtomicBool,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl TableController {
    fn with_state(
        table: Table,
        key: KeyState,
        key_name: String,
        services: Services,
        config: ControllerConfig,
    ) -> Self {
        let view = CachedView {
            table: Arc::new(table.clone()),
            key: key.clone(),
        };
        Self {
            id: table.id().clone(),
            key_name,
            services,
            config,
            state: Mutex::new(ControllerState {
                table,
                key,
                revision: 0,
                published_revision: None,
            }),
            publish_gate: Mutex::new(()),
            view: RwLock::new(view),
            persist_queued: AtomicBool::new(false),
        }
    }

    /// Build a new table, obtain its naming key, store the first snapshot and
    /// publish it.
    ///
    /// A failed publish is logged; the snapshot digest is still returned.
    pub async fn create(
        new: NewTable,
        services: Services,
        config: ControllerConfig,
    ) -> TableResult<(Arc<Self>, Digest)> {
        let mut table = Table::new(new.id.clone(), new.name, new.description);
        if let Some(payload) = non_empty(new.payload) {
            table.replace_records(parse_payload(&payload)?)?;
            table.refresh_summary();
        }

        let key_name = new.id.to_string();
        let pointer = ensure_key(services.names.as_ref(), &key_name).await?;
        let controller = Arc::new(Self::with_state(
            table,
            KeyState::Ensured { pointer },
            key_name,
            services,
            config,
        ));

        let receipt = {
            let _gate = controller.publish_gate.lock().await;
            let mut state = controller.state.lock().await;
            let next = state.table.clone();
            controller
                .commit(&mut state, next, PublishPolicy::FireAndLog)
                .await?
        };
        info!(table = %controller.id, digest = %receipt.digest, "table created");
        Ok((controller, receipt.digest))
    }

    /// Rebuild a controller from its registry entry.
    ///
    /// The table starts empty with the entry's id and name; call
    /// [`load`](Self::load) to fetch the last published snapshot.
    pub fn restore(entry: &RegistryEntry, services: Services, config: ControllerConfig) -> Arc<Self> {
        let table = Table::new(entry.id.clone(), entry.name.clone(), String::new());
        let key = match &entry.name_pointer {
            Some(pointer) => KeyState::Ensured {
                pointer: pointer.clone(),
            },
            None => KeyState::NoKey,
        };
        Arc::new(Self::with_state(
            table,
            key,
            entry.key_name.clone(),
            services,
            config,
        ))
    }

    pub fn id(&self) -> &TableId {
        &self.id
    }

    /// Name service key handle for this table.
    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    /// The current table. Never blocks on I/O.
    pub fn snapshot(&self) -> Arc<Table> {
        self.view.read().expect("lock poisoned").table.clone()
    }

    pub fn key_state(&self) -> KeyState {
        self.view.read().expect("lock poisoned").key.clone()
    }

    pub fn name_pointer(&self) -> Option<NamePointer> {
        self.key_state().pointer().cloned()
    }

    /// Digest of the last snapshot whose publish completed.
    pub fn last_published(&self) -> Option<Digest> {
        self.key_state().published().cloned()
    }

    /// The durable record of this table for the registry file.
    pub fn registry_entry(&self) -> RegistryEntry {
        let view = self.view.read().expect("lock poisoned");
        RegistryEntry {
            id: self.id.clone(),
            name: view.table.name().to_string(),
            key_name: self.key_name.clone(),
            name_pointer: view.key.pointer().cloned(),
        }
    }

    /// Apply the set fields of `update` and persist synchronously.
    ///
    /// The payload is parsed before anything changes; on failure the table
    /// is left exactly as it was.
    pub async fn update(&self, update: TableUpdate) -> TableResult<PersistReceipt> {
        let records = non_empty(update.payload)
            .map(|payload| parse_payload(&payload))
            .transpose()?;

        let _gate = self.publish_gate.lock().await;
        let mut state = self.state.lock().await;
        let mut next = state.table.clone();
        if let Some(name) = non_empty(update.name) {
            next.set_name(name);
        }
        if let Some(description) = non_empty(update.description) {
            next.set_description(description);
        }
        if let Some(records) = records {
            next.replace_records(records)?;
            next.refresh_summary();
        }
        next.touch();
        self.commit(&mut state, next, PublishPolicy::FireAndLog).await
    }

    /// Replace the records in memory only. Persist later with
    /// [`background_persist`](Self::background_persist).
    pub async fn fast_update(&self, payload: &str) -> TableResult<()> {
        let records = parse_payload(payload)?;
        let mut state = self.state.lock().await;
        state.table.replace_records(records)?;
        state.table.refresh_summary();
        state.revision += 1;
        debug!(table = %self.id, revision = state.revision, "records replaced in memory");
        self.refresh_view(&state);
        Ok(())
    }

    /// Append a record in memory only.
    pub async fn fast_append(&self, draft: RecordDraft) -> TableResult<Record> {
        let mut state = self.state.lock().await;
        let record = state.table.append(draft)?;
        state.table.refresh_summary();
        state.revision += 1;
        debug!(table = %self.id, version = record.version, "record appended in memory");
        self.refresh_view(&state);
        Ok(record)
    }

    /// Append a record and persist synchronously.
    pub async fn append_record(&self, draft: RecordDraft) -> TableResult<Record> {
        let _gate = self.publish_gate.lock().await;
        let mut state = self.state.lock().await;
        let mut next = state.table.clone();
        let record = next.append(draft)?;
        next.refresh_summary();
        self.commit(&mut state, next, PublishPolicy::FireAndLog)
            .await?;
        Ok(record)
    }

    /// Remove one record and persist synchronously.
    pub async fn remove_record(&self, selector: &RecordSelector) -> TableResult<Record> {
        let _gate = self.publish_gate.lock().await;
        let mut state = self.state.lock().await;
        let mut next = state.table.clone();
        let removed = next.remove(selector)?;
        next.refresh_summary();
        self.commit(&mut state, next, PublishPolicy::FireAndLog)
            .await?;
        Ok(removed)
    }

    /// Store and publish whatever the table holds right now.
    ///
    /// The state lock is released while talking to the network, including
    /// while a missing naming key is set up, so foreground operations keep
    /// going. A publish is skipped when a newer revision has
    /// already been published, and a slow publish never overwrites the
    /// recorded state of a newer one.
    pub async fn background_persist(&self, policy: PublishPolicy) -> TableResult<PersistReceipt> {
        let (bytes, revision) = {
            let state = self.state.lock().await;
            (state.table.to_snapshot()?, state.revision)
        };
        let digest = self.services.store.put(&bytes).await?;
        debug!(table = %self.id, digest = %digest, revision, "background snapshot stored");

        let _gate = self.publish_gate.lock().await;
        let pointer = {
            let state = self.state.lock().await;
            if state.published_revision.is_some_and(|p| p >= revision) {
                debug!(table = %self.id, revision, "newer revision already published");
                return Ok(PersistReceipt {
                    digest,
                    revision,
                    published: false,
                });
            }
            state.key.pointer().cloned()
        };
        // Key setup talks to the name service, so it runs outside the state
        // lock. The gate keeps other publishers from racing it.
        if pointer.is_none() {
            match ensure_key(self.services.names.as_ref(), &self.key_name).await {
                Ok(pointer) => {
                    let mut state = self.state.lock().await;
                    if state.key.pointer().is_none() {
                        state.key = KeyState::Ensured { pointer };
                        self.refresh_view(&state);
                    }
                }
                Err(err) => return self.publish_failed(err.into(), &digest, revision, policy),
            }
        }

        let result = self.services.names.publish(&self.key_name, &digest).await;
        match result {
            Ok(pointer) => {
                let mut state = self.state.lock().await;
                self.record_published(&mut state, pointer, digest.clone(), revision);
                self.refresh_view(&state);
                Ok(PersistReceipt {
                    digest,
                    revision,
                    published: true,
                })
            }
            Err(err) => self.publish_failed(err.into(), &digest, revision, policy),
        }
    }

    /// Replace the in-memory table with the snapshot the name pointer
    /// resolves to. Returns the digest that was loaded.
    pub async fn load(&self) -> TableResult<Digest> {
        let _gate = self.publish_gate.lock().await;
        let mut state = self.state.lock().await;
        let pointer = state
            .key
            .pointer()
            .cloned()
            .ok_or_else(|| TableError::NoNamePointer(self.id.clone()))?;

        let after = self.config.resolve_timeout;
        let resolved =
            tokio::time::timeout(after, self.services.names.resolve(&pointer, after)).await;
        let digest = match resolved {
            Err(_) | Ok(Err(ServiceError::Timeout { .. })) => {
                return Err(TableError::ResolutionTimeout { pointer, after })
            }
            Ok(result) => result?,
        };

        let bytes = self.services.store.get(&digest).await?;
        let table = Table::from_snapshot(&bytes)?;
        if table.id() != &self.id {
            return Err(TableError::Decode(format!(
                "snapshot {digest} belongs to table {}, expected {}",
                table.id(),
                self.id
            )));
        }

        state.table = table;
        state.revision += 1;
        state.published_revision = Some(state.revision);
        state.key = KeyState::Published {
            pointer,
            digest: digest.clone(),
        };
        self.refresh_view(&state);
        info!(table = %self.id, digest = %digest, "table loaded from name pointer");
        Ok(digest)
    }

    /// Mark a background persist as queued. Returns `false` if one already is.
    pub(crate) fn try_mark_persist_queued(&self) -> bool {
        !self.persist_queued.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn clear_persist_queued(&self) {
        self.persist_queued.store(false, Ordering::Release);
    }

    /// Store `next`, install it, then publish it. Nothing changes if the
    /// store rejects the snapshot.
    async fn commit(
        &self,
        state: &mut ControllerState,
        next: Table,
        policy: PublishPolicy,
    ) -> TableResult<PersistReceipt> {
        let bytes = next.to_snapshot()?;
        let digest = self.services.store.put(&bytes).await?;
        state.table = next;
        state.revision += 1;
        let revision = state.revision;
        self.refresh_view(state);
        debug!(table = %self.id, digest = %digest, revision, "snapshot stored");

        let published = match self.publish_locked(state, &digest).await {
            Ok(pointer) => {
                self.record_published(state, pointer, digest.clone(), revision);
                self.refresh_view(state);
                true
            }
            Err(err) => {
                self.refresh_view(state);
                self.publish_failed(err, &digest, revision, policy)?;
                false
            }
        };
        Ok(PersistReceipt {
            digest,
            revision,
            published,
        })
    }

    async fn publish_locked(
        &self,
        state: &mut ControllerState,
        digest: &Digest,
    ) -> TableResult<NamePointer> {
        self.ensure_pointer(state).await?;
        Ok(self.services.names.publish(&self.key_name, digest).await?)
    }

    async fn ensure_pointer(&self, state: &mut ControllerState) -> TableResult<NamePointer> {
        if let Some(pointer) = state.key.pointer() {
            return Ok(pointer.clone());
        }
        let pointer = ensure_key(self.services.names.as_ref(), &self.key_name).await?;
        state.key = KeyState::Ensured {
            pointer: pointer.clone(),
        };
        Ok(pointer)
    }

    fn record_published(
        &self,
        state: &mut ControllerState,
        pointer: NamePointer,
        digest: Digest,
        revision: u64,
    ) {
        if state.published_revision.is_some_and(|p| p > revision) {
            return;
        }
        debug!(table = %self.id, pointer = %pointer, digest = %digest, revision, "name published");
        state.published_revision = Some(revision);
        state.key = KeyState::Published { pointer, digest };
    }

    fn publish_failed(
        &self,
        err: TableError,
        digest: &Digest,
        revision: u64,
        policy: PublishPolicy,
    ) -> TableResult<PersistReceipt> {
        match policy {
            PublishPolicy::FireAndLog => {
                warn!(
                    table = %self.id,
                    digest = %digest,
                    error = %err,
                    "name publish failed; snapshot stored but not published"
                );
                Ok(PersistReceipt {
                    digest: digest.clone(),
                    revision,
                    published: false,
                })
            }
            PublishPolicy::Propagate => Err(err),
        }
    }

    fn refresh_view(&self, state: &ControllerState) {
        let mut view = self.view.write().expect("lock poisoned");
        *view = CachedView {
            table: Arc::new(state.table.clone()),
            key: state.key.clone(),
        };
    }
}

impl std::fmt::Debug for TableController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableController")
            .field("id", &self.id)
            .field("key_name", &self.key_name)
            .finish_non_exhaustive()
    }
}
