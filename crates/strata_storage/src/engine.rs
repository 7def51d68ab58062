//! The ordered key-value engine contract.

use crate::error::StorageResult;
use std::ops::Bound;

/// A raw `(key, value)` pair as stored in a tree.
pub type Entry = (Vec<u8>, Vec<u8>);

/// One mutation inside an atomic [`KvEngine::apply`] batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite `key` in `tree`.
    Put {
        /// Target tree.
        tree: String,
        /// Raw key bytes.
        key: Vec<u8>,
        /// Raw value bytes.
        value: Vec<u8>,
    },
    /// Delete `key` from `tree` if present.
    Remove {
        /// Target tree.
        tree: String,
        /// Raw key bytes.
        key: Vec<u8>,
    },
}

impl BatchOp {
    /// Returns the tree this operation targets.
    #[must_use]
    pub fn tree(&self) -> &str {
        match self {
            Self::Put { tree, .. } | Self::Remove { tree, .. } => tree,
        }
    }
}

/// An embedded, ordered key-value engine holding named trees.
///
/// Each tree is an independent map from byte keys to byte values, ordered by
/// unsigned byte-wise key comparison. Every single-key call is atomic;
/// [`KvEngine::apply`] makes a whole batch atomic.
///
/// The engine does no per-tree locking of its own beyond that atomicity.
/// Callers layer their own lifecycle locks on top.
///
/// # Iteration
///
/// There is no long-lived iterator. Scans call [`KvEngine::seek`] once per
/// step with the last key they saw as an exclusive bound, so a scan never
/// pins engine state and tolerates concurrent writes.
pub trait KvEngine: Send + Sync {
    /// Creates an empty tree. Returns `false` if it already exists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Closed`] once the engine is closed, or
    /// an I/O error if the mutation cannot be logged.
    fn create_tree(&self, tree: &str) -> StorageResult<bool>;

    /// Drops a tree and all of its entries. Returns `false` if it was absent.
    ///
    /// # Errors
    ///
    /// Same as [`KvEngine::create_tree`].
    fn drop_tree(&self, tree: &str) -> StorageResult<bool>;

    /// Renames a tree. Returns `false` if `from` is absent or `to` exists.
    ///
    /// # Errors
    ///
    /// Same as [`KvEngine::create_tree`].
    fn rename_tree(&self, from: &str, to: &str) -> StorageResult<bool>;

    /// Returns whether a tree exists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Closed`] once the engine is closed.
    fn contains_tree(&self, tree: &str) -> StorageResult<bool>;

    /// Returns all tree names in sorted order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Closed`] once the engine is closed.
    fn tree_names(&self) -> StorageResult<Vec<String>>;

    /// Reads one key.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TreeNotFound`] if the tree is missing.
    fn get(&self, tree: &str, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Writes one key and returns the value it replaced.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TreeNotFound`] if the tree is missing,
    /// or an I/O error if the mutation cannot be logged.
    fn put(&self, tree: &str, key: &[u8], value: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Removes one key and returns the value it held.
    ///
    /// Concurrent removers of the same key observe `Some` at most once.
    ///
    /// # Errors
    ///
    /// Same as [`KvEngine::put`].
    fn remove(&self, tree: &str, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Returns whether a key exists.
    ///
    /// # Errors
    ///
    /// Same as [`KvEngine::get`].
    fn contains(&self, tree: &str, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(tree, key)?.is_some())
    }

    /// Returns the first entry at or past `from` in scan direction.
    ///
    /// Forward scans return the smallest key satisfying the lower bound
    /// `from`; reverse scans return the largest key satisfying it as an
    /// upper bound. `Bound::Unbounded` starts at the first (or last) key.
    ///
    /// # Errors
    ///
    /// Same as [`KvEngine::get`].
    fn seek(&self, tree: &str, from: Bound<&[u8]>, reverse: bool) -> StorageResult<Option<Entry>>;

    /// Returns the number of entries in a tree.
    ///
    /// # Errors
    ///
    /// Same as [`KvEngine::get`].
    fn len(&self, tree: &str) -> StorageResult<usize>;

    /// Returns whether a tree holds no entries.
    ///
    /// # Errors
    ///
    /// Same as [`KvEngine::get`].
    fn is_empty(&self, tree: &str) -> StorageResult<bool> {
        Ok(self.len(tree)? == 0)
    }

    /// Removes every entry of a tree, keeping the tree itself.
    ///
    /// # Errors
    ///
    /// Same as [`KvEngine::put`].
    fn clear(&self, tree: &str) -> StorageResult<()>;

    /// Applies a batch of mutations atomically.
    ///
    /// Either every operation is applied or none is. All target trees must
    /// exist.
    ///
    /// # Errors
    ///
    /// Same as [`KvEngine::put`].
    fn apply(&self, ops: &[BatchOp]) -> StorageResult<()>;

    /// Pushes logged mutations to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the log flush fails.
    fn flush(&self) -> StorageResult<()>;

    /// Flushes and closes the engine. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    fn close(&self) -> StorageResult<()>;

    /// Returns whether the engine has been closed.
    fn is_closed(&self) -> bool;
}
