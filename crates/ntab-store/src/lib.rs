//! Content-addressed storage and mutable naming for ntab.
//!
//! Two external capabilities back every table:
//!
//! - A [`ContentStore`] keeps immutable blobs addressed by their [`Digest`].
//! - A [`NameService`] owns keys, each with one mutable [`NamePointer`] that
//!   can be repointed at a new digest. Publishing is slow and best-effort;
//!   resolving may observe a stale digest.
//!
//! # Backends
//!
//! - [`InMemoryContentStore`] / [`InMemoryNameService`] -- process-local
//!   backends for tests and embedding, with fault and latency injection
//! - `ntab-ipfs` -- an IPFS node reached over its HTTP RPC API
//!
//! # Design Rules
//!
//! 1. Blobs are immutable once written; writing the same bytes twice is a no-op.
//! 2. A failed publish leaves the previous pointer in place.
//! 3. Neither trait interprets blob contents.
//! 4. All backend failures are returned as [`ServiceError`], never swallowed.
//!
//! [`Digest`]: ntab_types::Digest
//! [`NamePointer`]: ntab_types::NamePointer

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{ServiceError, ServiceResult};
pub use memory::{InMemoryContentStore, InMemoryNameService};
pub use traits::{ContentStore, NameKey, NameService};
