use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use ntab_table::{Record, RecordDraft, RecordSelector, Table};
use ntab_types::{Digest, NamePointer, TableId};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{AppendPath, DirectoryConfig};
use crate::controller::{NewTable, PersistReceipt, Services, TableController, TableUpdate};
use crate::error::{TableError, TableResult};
use crate::persister::{PersistStats, PersistWorker, ShutdownMode};
use crate::registry::{Registry, RegistryFile};

/// Whether a read may be served from memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadMode {
    /// Return the in-memory table.
    #[default]
    Cached,
    /// Reload from the name pointer first.
    Refresh,
}

/// Result of [`TableDirectory::create`].
#[derive(Clone, Debug)]
pub struct CreatedTable {
    pub controller: Arc<TableController>,
    /// Digest of the first stored snapshot.
    pub digest: Digest,
}

/// One line of [`TableDirectory::list`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
    pub id: TableId,
    pub name: String,
    pub description: String,
    pub record_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub name_pointer: Option<NamePointer>,
    pub last_published: Option<Digest>,
    /// A refresh was requested but failed; this is the cached state.
    pub stale: bool,
}

impl TableSummary {
    fn of(controller: &TableController, stale: bool) -> Self {
        let table = controller.snapshot();
        Self {
            id: table.id().clone(),
            name: table.name().to_string(),
            description: table.description().to_string(),
            record_count: table.len(),
            created_at: table.created_at(),
            updated_at: table.updated_at(),
            name_pointer: controller.name_pointer(),
            last_published: controller.last_published(),
            stale,
        }
    }
}

#[derive(Default)]
struct DirectoryState {
    tables: BTreeMap<TableId, Arc<TableController>>,
    /// Names claimed by creates and renames still in flight.
    reserved_names: HashSet<String>,
}

/// Holds a table name until an in-flight create or rename finishes.
struct NameReservation<'a> {
    directory: &'a TableDirectory,
    name: String,
}

impl Drop for NameReservation<'_> {
    fn drop(&mut self) {
        self.directory
            .state
            .write()
            .expect("lock poisoned")
            .reserved_names
            .remove(&self.name);
    }
}

/// All tables known to this process.
///
/// The directory recovers tables from the registry file on open, routes
/// operations to per-table controllers, and rewrites the registry after
/// every change. Registry writes are best effort: a failure is logged and
/// the operation still succeeds.
pub struct TableDirectory {
    state: RwLock<DirectoryState>,
    registry: Registry,
    persister: PersistWorker,
    services: Services,
    config: DirectoryConfig,
}

impl TableDirectory {
    /// Recover every registered table and start the persist worker.
    ///
    /// Each table is reloaded from its name pointer. A table that cannot be
    /// loaded is kept with an empty record set.
    pub async fn open(config: DirectoryConfig, services: Services) -> TableResult<Self> {
        let registry = Registry::new(config.registry_path.clone());
        let file = registry.load().await?;
        let controller_config = config.controller();

        let mut tables = BTreeMap::new();
        for entry in file.tables.values() {
            let controller =
                TableController::restore(entry, services.clone(), controller_config.clone());
            tables.insert(entry.id.clone(), controller);
        }

        let mut loads = JoinSet::new();
        for controller in tables.values().cloned() {
            loads.spawn(async move {
                let result = controller.load().await;
                (controller.id().clone(), result)
            });
        }
        while let Some(joined) = loads.join_next().await {
            match joined {
                Ok((id, Ok(digest))) => debug!(table = %id, digest = %digest, "table recovered"),
                Ok((id, Err(err))) => {
                    warn!(table = %id, error = %err, "could not load table; keeping it empty")
                }
                Err(err) => warn!(error = %err, "table recovery task failed"),
            }
        }

        info!(
            tables = tables.len(),
            registry = %registry.path().display(),
            "table directory opened"
        );
        Ok(Self {
            state: RwLock::new(DirectoryState {
                tables,
                reserved_names: HashSet::new(),
            }),
            registry,
            persister: PersistWorker::start(&config.persist),
            services,
            config,
        })
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn len(&self) -> usize {
        self.state.read().expect("lock poisoned").tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create a table, store its first snapshot and register it.
    pub async fn create(
        &self,
        name: &str,
        description: &str,
        payload: Option<String>,
    ) -> TableResult<CreatedTable> {
        let _reservation = self.reserve_name(name, None)?;
        let (controller, digest) = TableController::create(
            NewTable {
                id: TableId::generate(),
                name: name.to_string(),
                description: description.to_string(),
                payload,
            },
            self.services.clone(),
            self.config.controller(),
        )
        .await?;

        self.state
            .write()
            .expect("lock poisoned")
            .tables
            .insert(controller.id().clone(), controller.clone());
        self.save_registry().await;
        Ok(CreatedTable { controller, digest })
    }

    pub fn get(&self, id: &str) -> TableResult<Arc<TableController>> {
        self.state
            .read()
            .expect("lock poisoned")
            .tables
            .get(id)
            .cloned()
            .ok_or_else(|| TableError::NotFound(id.to_string()))
    }

    /// The current table, optionally reloaded from its name pointer.
    pub async fn read(&self, id: &str, mode: ReadMode) -> TableResult<Arc<Table>> {
        let controller = self.get(id)?;
        if mode == ReadMode::Refresh {
            controller.load().await?;
        }
        Ok(controller.snapshot())
    }

    /// Summary of one table's cached state.
    pub fn summary(&self, id: &str) -> TableResult<TableSummary> {
        let controller = self.get(id)?;
        Ok(TableSummary::of(&controller, false))
    }

    /// Summaries of every table, ordered by id.
    ///
    /// With [`ReadMode::Refresh`] each table is reloaded first; a table that
    /// fails to reload is served from memory and flagged stale.
    pub async fn list(&self, mode: ReadMode) -> Vec<TableSummary> {
        let controllers = self.controllers();
        let mut summaries = Vec::with_capacity(controllers.len());
        for controller in controllers {
            let mut stale = false;
            if mode == ReadMode::Refresh {
                if let Err(err) = controller.load().await {
                    warn!(table = %controller.id(), error = %err, "refresh failed; serving cached table");
                    stale = true;
                }
            }
            summaries.push(TableSummary::of(&controller, stale));
        }
        summaries
    }

    /// Apply metadata and payload changes and persist synchronously.
    pub async fn update(&self, id: &str, update: TableUpdate) -> TableResult<PersistReceipt> {
        let controller = self.get(id)?;
        let _reservation = match update.new_name() {
            Some(name) => Some(self.reserve_name(name, Some(controller.id()))?),
            None => None,
        };
        let receipt = controller.update(update).await?;
        self.save_registry().await;
        Ok(receipt)
    }

    /// Append a record following the configured [`AppendPath`].
    pub async fn append(&self, id: &str, draft: RecordDraft) -> TableResult<Record> {
        let controller = self.get(id)?;
        let record = match self.config.append_path {
            AppendPath::Synchronous => controller.append_record(draft).await?,
            AppendPath::Deferred => {
                let record = controller.fast_append(draft).await?;
                self.schedule_persist(&controller);
                record
            }
        };
        self.save_registry().await;
        Ok(record)
    }

    /// Replace the record set in memory and persist in the background.
    pub async fn replace_records(&self, id: &str, payload: &str) -> TableResult<()> {
        let controller = self.get(id)?;
        controller.fast_update(payload).await?;
        self.schedule_persist(&controller);
        self.save_registry().await;
        Ok(())
    }

    pub async fn remove(&self, id: &str, selector: &RecordSelector) -> TableResult<Record> {
        let controller = self.get(id)?;
        let removed = controller.remove_record(selector).await?;
        self.save_registry().await;
        Ok(removed)
    }

    /// Forget a table. Its stored snapshots and naming key are left alone.
    pub async fn delete(&self, id: &str) -> TableResult<()> {
        let removed = self
            .state
            .write()
            .expect("lock poisoned")
            .tables
            .remove(id);
        if removed.is_none() {
            return Err(TableError::NotFound(id.to_string()));
        }
        info!(table = id, "table deleted");
        self.save_registry().await;
        Ok(())
    }

    /// Write the registry now, returning any failure.
    pub async fn flush_registry(&self) -> TableResult<()> {
        self.registry.save_with(|| self.registry_file()).await
    }

    /// Stop the persist worker, then flush the registry.
    pub async fn shutdown(&self, mode: ShutdownMode) -> PersistStats {
        let stats = self.persister.shutdown(mode).await;
        self.save_registry().await;
        stats
    }

    fn controllers(&self) -> Vec<Arc<TableController>> {
        self.state
            .read()
            .expect("lock poisoned")
            .tables
            .values()
            .cloned()
            .collect()
    }

    fn registry_file(&self) -> RegistryFile {
        let state = self.state.read().expect("lock poisoned");
        RegistryFile {
            tables: state
                .tables
                .iter()
                .map(|(id, controller)| (id.clone(), controller.registry_entry()))
                .collect(),
        }
    }

    async fn save_registry(&self) {
        if let Err(err) = self.flush_registry().await {
            warn!(
                registry = %self.registry.path().display(),
                error = %err,
                "failed to write table registry"
            );
        }
    }

    fn schedule_persist(&self, controller: &Arc<TableController>) {
        match self.persister.submit(controller.clone()) {
            Ok(true) => debug!(table = %controller.id(), "background persist queued"),
            Ok(false) => {}
            Err(err) => warn!(
                table = %controller.id(),
                error = %err,
                "background persist not scheduled; change kept in memory only"
            ),
        }
    }

    /// Claim `name` unless another table (other than `owner`) or an in-flight
    /// operation already uses it.
    fn reserve_name(&self, name: &str, owner: Option<&TableId>) -> TableResult<NameReservation<'_>> {
        if name.trim().is_empty() {
            return Err(TableError::InvalidName(name.to_string()));
        }
        let mut state = self.state.write().expect("lock poisoned");
        let taken = state.reserved_names.contains(name)
            || state
                .tables
                .iter()
                .any(|(id, c)| Some(id) != owner && c.snapshot().name() == name);
        if taken {
            return Err(TableError::Conflict(name.to_string()));
        }
        state.reserved_names.insert(name.to_string());
        Ok(NameReservation {
            directory: self,
            name: name.to_string(),
        })
    }
}

impl std::fmt::Debug for TableDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableDirectory")
            .field("tables", &self.len())
            .field("registry", &self.registry.path())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntab_store::{ContentStore, InMemoryContentStore, InMemoryNameService, NameService};
    use std::path::Path;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: DirectoryConfig,
        store: Arc<InMemoryContentStore>,
        names: Arc<InMemoryNameService>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = DirectoryConfig {
                registry_path: dir.path().join("tables_registry.json"),
                ..DirectoryConfig::default()
            };
            Self {
                _dir: dir,
                config,
                store: Arc::new(InMemoryContentStore::new()),
                names: Arc::new(InMemoryNameService::new()),
            }
        }

        fn with_append_path(mut self, append_path: AppendPath) -> Self {
            self.config.append_path = append_path;
            self
        }

        async fn open(&self) -> TableDirectory {
            let services = Services::new(self.store.clone(), self.names.clone());
            TableDirectory::open(self.config.clone(), services)
                .await
                .unwrap()
        }

        fn registry_path(&self) -> &Path {
            &self.config.registry_path
        }
    }

    fn draft(hash: &str) -> RecordDraft {
        RecordDraft {
            file_name: format!("{hash}.iso"),
            ..RecordDraft::new(hash)
        }
    }

    // -----------------------------------------------------------------------
    // Create / get / delete
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn create_registers_table() {
        let fx = Fixture::new();
        let dir = fx.open().await;
        let created = dir.create("movies", "my movies", None).await.unwrap();
        let id = created.controller.id().to_string();

        assert_eq!(dir.get(&id).unwrap().snapshot().name(), "movies");
        let file = Registry::new(fx.registry_path()).load().await.unwrap();
        let entry = &file.tables[id.as_str()];
        assert_eq!(entry.name, "movies");
        assert_eq!(entry.key_name, id);
        assert!(entry.name_pointer.is_some());
    }

    #[tokio::test]
    async fn duplicate_name_conflicts() {
        let fx = Fixture::new();
        let dir = fx.open().await;
        dir.create("movies", "", None).await.unwrap();
        let err = dir.create("movies", "", None).await.unwrap_err();
        assert!(matches!(err, TableError::Conflict(name) if name == "movies"));
        assert_eq!(dir.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_creates_of_one_name_conflict() {
        let fx = Fixture::new();
        let dir = fx.open().await;
        let (a, b) = tokio::join!(
            dir.create("movies", "", None),
            dir.create("movies", "", None)
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert_eq!(dir.len(), 1);
    }

    #[tokio::test]
    async fn failed_create_releases_name() {
        let fx = Fixture::new();
        let dir = fx.open().await;
        let err = dir
            .create("movies", "", Some("not json".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, TableError::MalformedPayload(_)));
        assert!(dir.create("movies", "", None).await.is_ok());
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let fx = Fixture::new();
        let dir = fx.open().await;
        assert!(matches!(
            dir.create("  ", "", None).await,
            Err(TableError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let fx = Fixture::new();
        let dir = fx.open().await;
        assert!(matches!(dir.get("nope"), Err(TableError::NotFound(_))));
        assert!(matches!(
            dir.append("nope", draft("aa")).await,
            Err(TableError::NotFound(_))
        ));
        assert!(matches!(dir.delete("nope").await, Err(TableError::NotFound(_))));
    }

    #[tokio::test]
    async fn summary_reports_cached_state() {
        let fx = Fixture::new();
        let dir = fx.open().await;
        let created = dir.create("movies", "my movies", None).await.unwrap();
        let id = created.controller.id().to_string();
        dir.append(&id, draft("aa")).await.unwrap();

        let summary = dir.summary(&id).unwrap();
        assert_eq!(summary.id.as_str(), id);
        assert_eq!(summary.name, "movies");
        assert_eq!(summary.record_count, 1);
        assert_eq!(summary.name_pointer, created.controller.name_pointer());
        assert!(!summary.stale);
        assert!(matches!(dir.summary("nope"), Err(TableError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_removes_table_and_registry_entry() {
        let fx = Fixture::new();
        let dir = fx.open().await;
        let id = dir.create("movies", "", None).await.unwrap().controller.id().to_string();
        dir.delete(&id).await.unwrap();

        assert!(dir.is_empty());
        let file = Registry::new(fx.registry_path()).load().await.unwrap();
        assert!(file.tables.is_empty());
        assert!(dir.create("movies", "", None).await.is_ok());
    }

    // -----------------------------------------------------------------------
    // Update
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn rename_onto_existing_name_conflicts() {
        let fx = Fixture::new();
        let dir = fx.open().await;
        dir.create("movies", "", None).await.unwrap();
        let music = dir.create("music", "", None).await.unwrap().controller;

        let err = dir
            .update(music.id().as_str(), TableUpdate::rename("movies"))
            .await
            .unwrap_err();
        assert!(matches!(err, TableError::Conflict(_)));
        assert_eq!(music.snapshot().name(), "music");

        dir.update(music.id().as_str(), TableUpdate::rename("music"))
            .await
            .unwrap();
        dir.update(music.id().as_str(), TableUpdate::rename("songs"))
            .await
            .unwrap();
        let file = Registry::new(fx.registry_path()).load().await.unwrap();
        assert_eq!(file.tables[music.id().as_str()].name, "songs");
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn deferred_append_is_visible_then_persisted() {
        let fx = Fixture::new();
        let dir = fx.open().await;
        let ctl = dir.create("movies", "", None).await.unwrap().controller;
        let first = ctl.last_published();
        let id = ctl.id().to_string();

        let record = dir.append(&id, draft("aa")).await.unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(dir.read(&id, ReadMode::Cached).await.unwrap().len(), 1);

        let stats = dir.shutdown(ShutdownMode::Drain).await;
        assert_eq!(stats.completed, 1);
        assert_ne!(ctl.last_published(), first);
    }

    #[tokio::test]
    async fn synchronous_append_publishes_before_returning() {
        let fx = Fixture::new().with_append_path(AppendPath::Synchronous);
        let dir = fx.open().await;
        let ctl = dir.create("movies", "", None).await.unwrap().controller;
        let first = ctl.last_published();

        dir.append(ctl.id().as_str(), draft("aa")).await.unwrap();
        assert_ne!(ctl.last_published(), first);
        assert_eq!(dir.shutdown(ShutdownMode::Drain).await, PersistStats::default());
    }

    #[tokio::test]
    async fn replace_records_then_remove() {
        let fx = Fixture::new();
        let dir = fx.open().await;
        let id = dir.create("movies", "", None).await.unwrap().controller.id().to_string();
        dir.replace_records(
            &id,
            r#"[{"version":1,"hash":"aa"},{"version":2,"hash":"bb"}]"#,
        )
        .await
        .unwrap();
        assert!(matches!(
            dir.replace_records(&id, "[oops").await,
            Err(TableError::MalformedPayload(_))
        ));

        let removed = dir
            .remove(&id, &RecordSelector::Hash("aa".into()))
            .await
            .unwrap();
        assert_eq!(removed.version, 1);
        let table = dir.read(&id, ReadMode::Cached).await.unwrap();
        assert_eq!(table.len(), 1);
        assert!(matches!(
            dir.remove(&id, &RecordSelector::Index(5)).await,
            Err(TableError::IndexOutOfRange { index: 5, len: 1 })
        ));
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn reopen_recovers_persisted_tables() {
        let fx = Fixture::new();
        let id = {
            let dir = fx.open().await;
            let id = dir.create("movies", "", None).await.unwrap().controller.id().to_string();
            dir.append(&id, draft("aa")).await.unwrap();
            dir.append(&id, draft("bb")).await.unwrap();
            dir.shutdown(ShutdownMode::Drain).await;
            id
        };

        let dir = fx.open().await;
        let table = dir.read(&id, ReadMode::Cached).await.unwrap();
        assert_eq!(table.name(), "movies");
        let hashes: Vec<_> = table.records().iter().map(|r| r.hash.as_str()).collect();
        assert_eq!(hashes, ["aa", "bb"]);
        assert_eq!(fx.names.generated_key_count(), 1);
    }

    #[tokio::test]
    async fn unresolvable_table_is_kept_empty() {
        let fx = Fixture::new();
        let id = {
            let dir = fx.open().await;
            let id = dir.create("movies", "", None).await.unwrap().controller.id().to_string();
            dir.append(&id, draft("aa")).await.unwrap();
            dir.shutdown(ShutdownMode::Drain).await;
            id
        };

        fx.names.fail_resolves(true);
        let dir = fx.open().await;
        let table = dir.read(&id, ReadMode::Cached).await.unwrap();
        assert_eq!(table.name(), "movies");
        assert!(table.is_empty());

        assert!(dir.read(&id, ReadMode::Refresh).await.is_err());
        let listed = dir.list(ReadMode::Refresh).await;
        assert_eq!(listed.len(), 1);
        assert!(listed[0].stale);

        fx.names.fail_resolves(false);
        let listed = dir.list(ReadMode::Refresh).await;
        assert!(!listed[0].stale);
        assert_eq!(listed[0].record_count, 1);
    }

    #[tokio::test]
    async fn corrupt_registry_fails_open() {
        let fx = Fixture::new();
        std::fs::write(fx.registry_path(), b"]").unwrap();
        let services = Services::new(fx.store.clone(), fx.names.clone());
        let err = TableDirectory::open(fx.config.clone(), services)
            .await
            .unwrap_err();
        assert!(matches!(err, TableError::Registry(_)));
    }

    #[tokio::test]
    async fn legacy_display_name_ids_are_recovered() {
        let fx = Fixture::new();
        let mut legacy = Table::new(TableId::new("My Movies").unwrap(), "My Movies", "");
        legacy.append(draft("aa")).unwrap();
        let digest = fx.store.put(&legacy.to_snapshot().unwrap()).await.unwrap();
        let key = fx.names.generate_key("My Movies").await.unwrap();
        fx.names.publish("My Movies", &digest).await.unwrap();

        let registry = format!(
            r#"{{"tables":{{
                "My Movies":{{"id":"My Movies","name":"My Movies","keyName":"My Movies","ipnsName":"{}"}},
                "music":{{"id":"music","name":"music","keyName":"music","ipnsName":""}},
                "a/b":{{"id":"a/b","name":"broken","keyName":"a/b"}}
            }}}}"#,
            key.pointer
        );
        std::fs::write(fx.registry_path(), registry).unwrap();

        let dir = fx.open().await;
        assert_eq!(dir.len(), 2);
        let table = dir.read("My Movies", ReadMode::Cached).await.unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.records()[0].hash, "aa");
        assert!(dir.read("music", ReadMode::Cached).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn registry_failures_do_not_fail_operations() {
        let fx = Fixture::new();
        let dir = fx.open().await;
        std::fs::create_dir(fx.registry_path()).unwrap();

        let created = dir.create("movies", "", None).await;
        assert!(created.is_ok());
        assert!(dir.flush_registry().await.is_err());
    }
}
