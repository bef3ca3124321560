//! Foundation types for ntab.
//!
//! Every other ntab crate depends on `ntab-types` for the identifiers that
//! cross component boundaries.
//!
//! # Key Types
//!
//! - [`Digest`] -- Content address returned by a content store
//! - [`NamePointer`] -- Resolvable public name owned by a naming key
//! - [`TableId`] -- Stable identifier of a table, UUID v7 by default

pub mod error;
pub mod ids;

pub use error::TypeError;
pub use ids::{Digest, NamePointer, TableId};
