//! `BTreeMap`-backed [`KvEngine`] with an optional mutation log.

use crate::backend::StorageBackend;
use crate::engine::{BatchOp, Entry, KvEngine};
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::log::{read_log, LogRecord};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// File name of the mutation log inside an engine directory.
pub const LOG_FILE_NAME: &str = "strata.log";

type Tree = BTreeMap<Vec<u8>, Vec<u8>>;

/// An ordered key-value engine keeping every tree in memory.
///
/// Without a log backend the engine is purely ephemeral. With one, every
/// mutation is appended to the log before it becomes visible, and opening
/// the engine again replays the log.
///
/// # Example
///
/// ```rust
/// use strata_storage::{KvEngine, OrderedEngine};
/// use std::ops::Bound;
///
/// let engine = OrderedEngine::in_memory();
/// engine.create_tree("users").unwrap();
/// engine.put("users", b"b", b"2").unwrap();
/// engine.put("users", b"a", b"1").unwrap();
///
/// let first = engine.seek("users", Bound::Unbounded, false).unwrap();
/// assert_eq!(first, Some((b"a".to_vec(), b"1".to_vec())));
/// ```
pub struct OrderedEngine {
    trees: RwLock<HashMap<String, Tree>>,
    log: Option<Mutex<Box<dyn StorageBackend>>>,
    sync_on_write: bool,
    closed: AtomicBool,
}

impl fmt::Debug for OrderedEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedEngine")
            .field("trees", &self.trees.read().len())
            .field("logged", &self.log.is_some())
            .field("sync_on_write", &self.sync_on_write)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl OrderedEngine {
    /// Creates an empty engine with no log.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            trees: RwLock::new(HashMap::new()),
            log: None,
            sync_on_write: false,
            closed: AtomicBool::new(false),
        }
    }

    /// Opens an engine logging to `<dir>/strata.log`, creating `dir` if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the log file cannot be opened or read.
    pub fn open(dir: &Path, sync_on_write: bool) -> StorageResult<Self> {
        let backend = FileBackend::open(&dir.join(LOG_FILE_NAME))?;
        info!(path = %backend.path().display(), "opening engine log");
        Self::with_backend(Box::new(backend), sync_on_write)
    }

    /// Opens an engine over an arbitrary log backend, replaying its contents.
    ///
    /// A torn or corrupt tail is truncated away so that later appends start
    /// on a record boundary.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or truncated.
    pub fn with_backend(
        mut backend: Box<dyn StorageBackend>,
        sync_on_write: bool,
    ) -> StorageResult<Self> {
        let replay = read_log(backend.as_ref())?;
        if replay.torn_tail {
            warn!(
                valid_len = replay.valid_len,
                "discarding torn tail of engine log"
            );
            backend.truncate(replay.valid_len)?;
        }

        let mut trees = HashMap::new();
        let replayed = replay.records.len();
        for record in replay.records {
            apply_record(&mut trees, record);
        }
        debug!(records = replayed, trees = trees.len(), "engine log replayed");

        Ok(Self {
            trees: RwLock::new(trees),
            log: Some(Mutex::new(backend)),
            sync_on_write,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    /// Appends a record to the log. Callers hold the tree write lock so
    /// that log order matches apply order.
    fn log(&self, record: &LogRecord) -> StorageResult<()> {
        if let Some(log) = &self.log {
            let mut backend = log.lock();
            backend.append(&record.to_frame())?;
            if self.sync_on_write {
                backend.flush()?;
            }
        }
        Ok(())
    }

    fn read_tree<T>(&self, tree: &str, f: impl FnOnce(&Tree) -> T) -> StorageResult<T> {
        self.ensure_open()?;
        let trees = self.trees.read();
        let map = trees
            .get(tree)
            .ok_or_else(|| StorageError::TreeNotFound(tree.to_string()))?;
        Ok(f(map))
    }
}

fn apply_op(trees: &mut HashMap<String, Tree>, op: BatchOp) -> Option<Vec<u8>> {
    match op {
        BatchOp::Put { tree, key, value } => trees
            .get_mut(&tree)
            .and_then(|map| map.insert(key, value)),
        BatchOp::Remove { tree, key } => trees.get_mut(&tree).and_then(|map| map.remove(&key)),
    }
}

fn apply_record(trees: &mut HashMap<String, Tree>, record: LogRecord) {
    match record {
        LogRecord::Op(op) => {
            apply_op(trees, op);
        }
        LogRecord::Batch(ops) => {
            for op in ops {
                apply_op(trees, op);
            }
        }
        LogRecord::CreateTree(tree) => {
            trees.entry(tree).or_default();
        }
        LogRecord::DropTree(tree) => {
            trees.remove(&tree);
        }
        LogRecord::RenameTree { from, to } => {
            if let Some(map) = trees.remove(&from) {
                trees.insert(to, map);
            }
        }
        LogRecord::ClearTree(tree) => {
            if let Some(map) = trees.get_mut(&tree) {
                map.clear();
            }
        }
    }
}

impl KvEngine for OrderedEngine {
    fn create_tree(&self, tree: &str) -> StorageResult<bool> {
        self.ensure_open()?;
        let mut trees = self.trees.write();
        if trees.contains_key(tree) {
            return Ok(false);
        }
        self.log(&LogRecord::CreateTree(tree.to_string()))?;
        trees.insert(tree.to_string(), Tree::new());
        Ok(true)
    }

    fn drop_tree(&self, tree: &str) -> StorageResult<bool> {
        self.ensure_open()?;
        let mut trees = self.trees.write();
        if !trees.contains_key(tree) {
            return Ok(false);
        }
        self.log(&LogRecord::DropTree(tree.to_string()))?;
        trees.remove(tree);
        Ok(true)
    }

    fn rename_tree(&self, from: &str, to: &str) -> StorageResult<bool> {
        self.ensure_open()?;
        let mut trees = self.trees.write();
        if !trees.contains_key(from) || trees.contains_key(to) {
            return Ok(false);
        }
        self.log(&LogRecord::RenameTree {
            from: from.to_string(),
            to: to.to_string(),
        })?;
        if let Some(map) = trees.remove(from) {
            trees.insert(to.to_string(), map);
        }
        Ok(true)
    }

    fn contains_tree(&self, tree: &str) -> StorageResult<bool> {
        self.ensure_open()?;
        Ok(self.trees.read().contains_key(tree))
    }

    fn tree_names(&self) -> StorageResult<Vec<String>> {
        self.ensure_open()?;
        let mut names: Vec<String> = self.trees.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn get(&self, tree: &str, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.read_tree(tree, |map| map.get(key).cloned())
    }

    fn put(&self, tree: &str, key: &[u8], value: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let mut trees = self.trees.write();
        let map = trees
            .get_mut(tree)
            .ok_or_else(|| StorageError::TreeNotFound(tree.to_string()))?;
        let op = BatchOp::Put {
            tree: tree.to_string(),
            key: key.to_vec(),
            value: value.to_vec(),
        };
        self.log(&LogRecord::Op(op))?;
        Ok(map.insert(key.to_vec(), value.to_vec()))
    }

    fn remove(&self, tree: &str, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let mut trees = self.trees.write();
        let map = trees
            .get_mut(tree)
            .ok_or_else(|| StorageError::TreeNotFound(tree.to_string()))?;
        if !map.contains_key(key) {
            return Ok(None);
        }
        self.log(&LogRecord::Op(BatchOp::Remove {
            tree: tree.to_string(),
            key: key.to_vec(),
        }))?;
        Ok(map.remove(key))
    }

    fn seek(&self, tree: &str, from: Bound<&[u8]>, reverse: bool) -> StorageResult<Option<Entry>> {
        self.read_tree(tree, |map| {
            let found = if reverse {
                map.range::<[u8], _>((Bound::Unbounded, from)).next_back()
            } else {
                map.range::<[u8], _>((from, Bound::Unbounded)).next()
            };
            found.map(|(k, v)| (k.clone(), v.clone()))
        })
    }

    fn len(&self, tree: &str) -> StorageResult<usize> {
        self.read_tree(tree, BTreeMap::len)
    }

    fn clear(&self, tree: &str) -> StorageResult<()> {
        self.ensure_open()?;
        let mut trees = self.trees.write();
        if !trees.contains_key(tree) {
            return Err(StorageError::TreeNotFound(tree.to_string()));
        }
        self.log(&LogRecord::ClearTree(tree.to_string()))?;
        if let Some(map) = trees.get_mut(tree) {
            map.clear();
        }
        Ok(())
    }

    fn apply(&self, ops: &[BatchOp]) -> StorageResult<()> {
        self.ensure_open()?;
        if ops.is_empty() {
            return Ok(());
        }
        let mut trees = self.trees.write();
        if let Some(missing) = ops.iter().find(|op| !trees.contains_key(op.tree())) {
            return Err(StorageError::TreeNotFound(missing.tree().to_string()));
        }
        self.log(&LogRecord::Batch(ops.to_vec()))?;
        for op in ops {
            apply_op(&mut trees, op.clone());
        }
        Ok(())
    }

    fn flush(&self) -> StorageResult<()> {
        self.ensure_open()?;
        if let Some(log) = &self.log {
            log.lock().flush()?;
        }
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(log) = &self.log {
            log.lock().flush()?;
        }
        debug!("engine closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use std::sync::Arc;

    fn engine_with(tree: &str, keys: &[&[u8]]) -> OrderedEngine {
        let engine = OrderedEngine::in_memory();
        engine.create_tree(tree).unwrap();
        for key in keys {
            engine.put(tree, key, b"v").unwrap();
        }
        engine
    }

    #[test]
    fn put_returns_previous_value() {
        let engine = engine_with("t", &[]);
        assert_eq!(engine.put("t", b"k", b"1").unwrap(), None);
        assert_eq!(engine.put("t", b"k", b"2").unwrap(), Some(b"1".to_vec()));
        assert_eq!(engine.get("t", b"k").unwrap(), Some(b"2".to_vec()));
        assert_eq!(engine.remove("t", b"k").unwrap(), Some(b"2".to_vec()));
        assert_eq!(engine.remove("t", b"k").unwrap(), None);
    }

    #[test]
    fn seek_respects_bounds_in_both_directions() {
        let engine = engine_with("t", &[b"a", b"c", b"e"]);

        let key = |e: Option<Entry>| e.map(|(k, _)| k);
        assert_eq!(
            key(engine.seek("t", Bound::Included(b"c"), false).unwrap()),
            Some(b"c".to_vec())
        );
        assert_eq!(
            key(engine.seek("t", Bound::Excluded(b"c"), false).unwrap()),
            Some(b"e".to_vec())
        );
        assert_eq!(
            key(engine.seek("t", Bound::Excluded(b"c"), true).unwrap()),
            Some(b"a".to_vec())
        );
        assert_eq!(
            key(engine.seek("t", Bound::Included(b"d"), true).unwrap()),
            Some(b"c".to_vec())
        );
        assert_eq!(
            key(engine.seek("t", Bound::Unbounded, true).unwrap()),
            Some(b"e".to_vec())
        );
        assert_eq!(engine.seek("t", Bound::Excluded(b"e"), false).unwrap(), None);
    }

    #[test]
    fn missing_tree_is_reported() {
        let engine = OrderedEngine::in_memory();
        assert!(matches!(
            engine.get("nope", b"k"),
            Err(StorageError::TreeNotFound(_))
        ));
        let ops = vec![BatchOp::Remove {
            tree: "nope".to_string(),
            key: b"k".to_vec(),
        }];
        assert!(matches!(
            engine.apply(&ops),
            Err(StorageError::TreeNotFound(_))
        ));
    }

    #[test]
    fn tree_lifecycle() {
        let engine = engine_with("a", &[b"1"]);
        assert!(!engine.create_tree("a").unwrap());
        assert!(engine.rename_tree("a", "b").unwrap());
        assert!(!engine.rename_tree("a", "c").unwrap());
        assert_eq!(engine.tree_names().unwrap(), vec!["b".to_string()]);
        assert_eq!(engine.len("b").unwrap(), 1);

        engine.clear("b").unwrap();
        assert!(engine.is_empty("b").unwrap());
        assert!(engine.drop_tree("b").unwrap());
        assert!(!engine.contains_tree("b").unwrap());
    }

    #[test]
    fn closed_engine_rejects_calls() {
        let engine = engine_with("t", &[]);
        engine.close().unwrap();
        engine.close().unwrap();
        assert!(engine.is_closed());
        assert!(matches!(engine.get("t", b"k"), Err(StorageError::Closed)));
        assert!(matches!(engine.put("t", b"k", b"v"), Err(StorageError::Closed)));
    }

    #[test]
    fn log_replay_restores_trees() {
        let engine = OrderedEngine::with_backend(Box::new(InMemoryBackend::new()), true).unwrap();
        engine.create_tree("users").unwrap();
        engine.put("users", b"u1", b"ann").unwrap();
        engine.put("users", b"u2", b"bob").unwrap();
        engine
            .apply(&[
                BatchOp::Remove {
                    tree: "users".to_string(),
                    key: b"u1".to_vec(),
                },
                BatchOp::Put {
                    tree: "users".to_string(),
                    key: b"u3".to_vec(),
                    value: b"cy".to_vec(),
                },
            ])
            .unwrap();
        engine.rename_tree("users", "people").unwrap();

        let bytes = match &engine.log {
            Some(log) => log.lock().read_all().unwrap(),
            None => unreachable!(),
        };

        let reopened =
            OrderedEngine::with_backend(Box::new(InMemoryBackend::with_data(bytes)), true).unwrap();
        assert_eq!(reopened.tree_names().unwrap(), vec!["people".to_string()]);
        assert_eq!(reopened.get("people", b"u1").unwrap(), None);
        assert_eq!(reopened.get("people", b"u2").unwrap(), Some(b"bob".to_vec()));
        assert_eq!(reopened.get("people", b"u3").unwrap(), Some(b"cy".to_vec()));
    }

    #[test]
    fn file_engine_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = OrderedEngine::open(dir.path(), true).unwrap();
            engine.create_tree("t").unwrap();
            engine.put("t", b"k", b"v").unwrap();
            engine.close().unwrap();
        }
        let engine = OrderedEngine::open(dir.path(), true).unwrap();
        assert_eq!(engine.get("t", b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn concurrent_removers_claim_once() {
        let engine = Arc::new(engine_with("q", &[b"only"]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || engine.remove("q", b"only").unwrap().is_some())
            })
            .collect();
        let claimed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|c| *c)
            .count();
        assert_eq!(claimed, 1);
    }

    proptest::proptest! {
        #[test]
        fn seek_agrees_with_btree_model(
            keys in proptest::collection::btree_set(proptest::collection::vec(0u8..4, 0..4), 0..24),
            target in proptest::collection::vec(0u8..4, 0..4),
            reverse in proptest::bool::ANY,
        ) {
            let engine = OrderedEngine::in_memory();
            engine.create_tree("t").unwrap();
            for key in &keys {
                engine.put("t", key, b"").unwrap();
            }

            let expected = if reverse {
                keys.range(..=target.clone()).next_back().cloned()
            } else {
                keys.range(target.clone()..).next().cloned()
            };
            let found = engine
                .seek("t", Bound::Included(target.as_slice()), reverse)
                .unwrap()
                .map(|(k, _)| k);
            proptest::prop_assert_eq!(found, expected);
        }
    }
}
