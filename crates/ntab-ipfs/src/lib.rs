//! IPFS backend for ntab.
//!
//! [`IpfsClient`] talks to a local IPFS node (Kubo) over its HTTP RPC API and
//! implements both [`ContentStore`](ntab_store::ContentStore) (`add` / `cat`)
//! and [`NameService`](ntab_store::NameService) (`key/list`, `key/gen`,
//! `name/publish`, `name/resolve`).
//!
//! # Example
//!
//! ```no_run
//! use ntab_ipfs::{IpfsClient, IpfsConfig};
//! use ntab_store::ContentStore;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = IpfsClient::new(IpfsConfig::default())?;
//! let digest = client.put(b"hello").await?;
//! assert_eq!(client.get(&digest).await?, b"hello");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;

pub use client::IpfsClient;
pub use config::IpfsConfig;
