#![deny(missing_docs)]
//! # hashkv
//! A multi-threaded, durable, hash-indexed key-value store that maps
//! [`String`] keys to [`String`] values
//!
//! [`String`]: https://doc.rust-lang.org/std/string/struct.String.html
//!
//! The store keeps its data in an open-addressed hash table with double
//! hashing and tombstones, fronted by a Bloom filter that short-circuits
//! lookups of absent keys. Durability comes from a text write-ahead log
//! that records every mutation before it is applied, plus periodic binary
//! snapshots that fold the log away. Connection-handling threads share one
//! store through cheap clones; a single coarse lock serializes operations.
//!
//! ```rust
//! use hashkv::{KvStore, SnapshotPolicy};
//!
//! # fn main() -> hashkv::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let store = KvStore::open(dir.path())?;
//! let policy = SnapshotPolicy::new(10);
//!
//! store.set("answer".to_string(), "42".to_string())?;
//! if policy.record_write() {
//!     store.create_snapshot()?;
//! }
//! assert_eq!(store.get("answer".to_string())?, Some("42".to_string()));
//! # Ok(())
//! # }
//! ```

mod bloom;
mod command;
mod config;
mod error;
mod snapshot;
mod store;
mod table;
mod wal;

pub use crate::bloom::BloomFilter;
pub use crate::command::Command;
pub use crate::config::Config;
pub use crate::error::{KvError, Result};
pub use crate::store::{KvStore, SnapshotPolicy};
