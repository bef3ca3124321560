//! The table entity.
//!
//! A [`Table`] is an ordered sequence of immutable [`Record`]s plus display
//! metadata. Its persisted form is a JSON snapshot whose `data` field holds
//! the record array as a string; [`Table::to_snapshot`] and
//! [`Table::from_snapshot`] are the only way in and out of that form, so the
//! record list and the serialized payload can never disagree.
//!
//! # Modules
//!
//! - [`record`] -- [`Record`], [`RecordDraft`], [`RecordSelector`]
//! - [`payload`] -- parsing and encoding of the record-array payload
//! - [`table`] -- the [`Table`] entity and its snapshot codec
//! - [`summary`] -- the record-count description line

pub mod error;
pub mod payload;
pub mod record;
pub mod summary;
pub mod table;

pub use error::{TableDataError, TableDataResult};
pub use payload::{encode_payload, parse_payload, validate_versions};
pub use record::{Record, RecordDraft, RecordSelector};
pub use table::Table;
