//! # Strata Storage
//!
//! The ordered key-value engine underneath Strata operators. It stores
//! opaque bytes in named trees and knows nothing about key types,
//! documents or indexes.
//!
//! Keys inside a tree sort by unsigned byte comparison. Single-key calls
//! and [`BatchOp`] batches are atomic, and scans are stateless
//! [`KvEngine::seek`] steps rather than iterators that pin a snapshot.
//!
//! [`OrderedEngine`] keeps each tree in a `BTreeMap`. A persistent engine
//! also appends every mutation to a checksummed log in a
//! [`StorageBackend`] ([`FileBackend`] on disk, [`InMemoryBackend`] in
//! tests) and replays it on open.
//!
//! ## Example
//!
//! ```rust
//! use strata_storage::{KvEngine, OrderedEngine};
//!
//! let engine = OrderedEngine::in_memory();
//! engine.create_tree("users").unwrap();
//! engine.put("users", b"u1", b"ann").unwrap();
//! assert_eq!(engine.get("users", b"u1").unwrap(), Some(b"ann".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod engine;
mod error;
mod file;
mod log;
mod memory;
mod ordered;

pub use backend::StorageBackend;
pub use engine::{BatchOp, Entry, KvEngine};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use ordered::{OrderedEngine, LOG_FILE_NAME};
