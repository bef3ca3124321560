//! Table storage controller for ntab.
//!
//! Every table lives in three places at once: the authoritative copy in
//! memory, immutable snapshots in a [`ContentStore`], and a mutable name
//! pointer in a [`NameService`] that is republished at the latest snapshot.
//! This crate keeps the three reconciled while reads and fast-path writes
//! stay independent of the (slow, best-effort) naming layer.
//!
//! # Components
//!
//! - [`TableController`] -- owns one table; create, update, append, remove,
//!   fast-path writes, background persist, load
//! - [`KeyState`] / [`ensure_key`] -- naming key lifecycle
//! - [`PersistWorker`] -- bounded pool running background persists
//! - [`Registry`] -- durable table list used for recovery
//! - [`TableDirectory`] -- all tables of a process; the entry point for
//!   request layers
//!
//! # Design Rules
//!
//! 1. A mutation either commits completely or leaves the table untouched.
//! 2. Synchronous operations publish exactly the state they produced.
//! 3. A background persist never publishes a revision older than one this
//!    controller already published.
//! 4. Snapshot reads never wait on the network.
//! 5. Publish and registry failures on best-effort paths are logged, never
//!    returned; [`PublishPolicy`] makes the choice explicit.
//!
//! [`ContentStore`]: ntab_store::ContentStore
//! [`NameService`]: ntab_store::NameService

pub mod config;
pub mod controller;
pub mod directory;
pub mod error;
pub mod key;
pub mod persister;
pub mod policy;
pub mod registry;

pub use config::{AppendPath, ControllerConfig, DirectoryConfig, PersistConfig};
pub use controller::{NewTable, PersistReceipt, Services, TableController, TableUpdate};
pub use directory::{CreatedTable, ReadMode, TableDirectory, TableSummary};
pub use error::{TableError, TableResult};
pub use key::{ensure_key, KeyState};
pub use persister::{PersistStats, PersistWorker, ShutdownMode};
pub use policy::PublishPolicy;
pub use registry::{Registry, RegistryEntry, RegistryFile};
