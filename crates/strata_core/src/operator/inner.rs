//! State shared by every handle of one operator.

use super::{decode_document, encode_document};
use crate::catalog::{Catalog, OperatorDescriptor};
use crate::error::{CoreError, CoreResult, EngineContext};
use crate::index::{IndexDefinition, IndexManager};
use crate::mode::OperatorMode;
use crate::sequence::SequenceGenerator;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_codec::Value;
use strata_storage::{BatchOp, KvEngine};
use tracing::{debug, info};

/// Engine handle, mode, index definitions and lifecycle lock of one
/// operator.
///
/// The lock guards the index definitions and orders structural changes
/// against data access: reads and writes hold it shared (reentrantly),
/// `close`, `trancate` and index changes hold it exclusively. Methods that
/// take a `defs` slice expect the caller to hold a guard.
pub(crate) struct OperatorCore {
    name: String,
    mode: OperatorMode,
    engine: Arc<dyn KvEngine>,
    ids: Arc<SequenceGenerator>,
    state: RwLock<Vec<IndexDefinition>>,
    closed: AtomicBool,
}

pub(crate) type ReadGuard<'a> = RwLockReadGuard<'a, Vec<IndexDefinition>>;
pub(crate) type WriteGuard<'a> = RwLockWriteGuard<'a, Vec<IndexDefinition>>;

impl OperatorCore {
    pub(crate) fn new(
        descriptor: OperatorDescriptor,
        engine: Arc<dyn KvEngine>,
        ids: Arc<SequenceGenerator>,
    ) -> Self {
        Self {
            name: descriptor.name,
            mode: descriptor.mode,
            engine,
            ids,
            state: RwLock::new(descriptor.indexes),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn mode(&self) -> &OperatorMode {
        &self.mode
    }

    pub(crate) fn engine(&self) -> &dyn KvEngine {
        self.engine.as_ref()
    }

    pub(crate) fn ids(&self) -> &SequenceGenerator {
        &self.ids
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Takes the shared lock, failing if the operator is closed.
    pub(crate) fn read(&self) -> CoreResult<ReadGuard<'_>> {
        let guard = self.state.read_recursive();
        if self.is_closed() {
            return Err(CoreError::already_closed(&self.name));
        }
        Ok(guard)
    }

    /// Takes the exclusive lock, failing if the operator is closed.
    pub(crate) fn write(&self) -> CoreResult<WriteGuard<'_>> {
        let guard = self.state.write();
        if self.is_closed() {
            return Err(CoreError::already_closed(&self.name));
        }
        Ok(guard)
    }

    /// Marks the operator closed once in-flight steps have finished.
    pub(crate) fn close(&self) {
        let _guard = self.state.write();
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(operator = %self.name, "operator closed");
        }
    }

    /// Name, mode and index definitions, readable after close.
    ///
    /// Must not be called while this thread holds the exclusive lock.
    pub(crate) fn snapshot(&self) -> OperatorDescriptor {
        let defs = self.state.read_recursive();
        self.descriptor(&defs)
    }

    /// Name, mode and the given index definitions.
    pub(crate) fn descriptor(&self, defs: &[IndexDefinition]) -> OperatorDescriptor {
        OperatorDescriptor {
            name: self.name.clone(),
            mode: self.mode.clone(),
            indexes: defs.to_vec(),
        }
    }

    pub(crate) fn fetch(&self, key: &[u8]) -> CoreResult<Option<Value>> {
        self.engine
            .get(&self.name, key)
            .for_operator(&self.name)?
            .map(|bytes| decode_document(&self.name, &bytes))
            .transpose()
    }

    pub(crate) fn contains_key(&self, key: &[u8]) -> CoreResult<bool> {
        self.engine.contains(&self.name, key).for_operator(&self.name)
    }

    pub(crate) fn len(&self) -> CoreResult<usize> {
        self.engine.len(&self.name).for_operator(&self.name)
    }

    /// Writes `doc` under `key` and maintains indexes. Returns the replaced
    /// document.
    pub(crate) fn store(
        &self,
        defs: &[IndexDefinition],
        key: &[u8],
        doc: &Value,
    ) -> CoreResult<Option<Value>> {
        let bytes = encode_document(doc)?;
        let indexes = IndexManager::new(self.engine(), &self.name, defs);
        if !indexes.is_empty() {
            self.apply(&indexes.insert_ops(key, doc))?;
        }

        let previous = self
            .engine
            .put(&self.name, key, &bytes)
            .for_operator(&self.name)?
            .map(|old| decode_document(&self.name, &old))
            .transpose()?;

        if let Some(old) = &previous {
            self.apply(&indexes.stale_ops(key, old, Some(doc)))?;
        }
        Ok(previous)
    }

    /// Removes `key` and its index entries. Returns the removed document.
    pub(crate) fn delete(&self, defs: &[IndexDefinition], key: &[u8]) -> CoreResult<Option<Value>> {
        let previous = self
            .engine
            .remove(&self.name, key)
            .for_operator(&self.name)?
            .map(|old| decode_document(&self.name, &old))
            .transpose()?;

        if let Some(old) = &previous {
            let indexes = IndexManager::new(self.engine(), &self.name, defs);
            self.apply(&indexes.stale_ops(key, old, None))?;
        }
        Ok(previous)
    }

    /// The operations [`OperatorCore::store`] would perform, computed
    /// against committed state, plus the committed document.
    pub(crate) fn stage_store(
        &self,
        defs: &[IndexDefinition],
        key: &[u8],
        doc: &Value,
    ) -> CoreResult<(Vec<BatchOp>, Option<Value>)> {
        let indexes = IndexManager::new(self.engine(), &self.name, defs);
        let previous = self.fetch(key)?;
        let mut ops = indexes.insert_ops(key, doc);
        ops.push(BatchOp::Put {
            tree: self.name.clone(),
            key: key.to_vec(),
            value: encode_document(doc)?,
        });
        if let Some(old) = &previous {
            ops.extend(indexes.stale_ops(key, old, Some(doc)));
        }
        Ok((ops, previous))
    }

    /// The operations [`OperatorCore::delete`] would perform.
    pub(crate) fn stage_delete(
        &self,
        defs: &[IndexDefinition],
        key: &[u8],
    ) -> CoreResult<(Vec<BatchOp>, Option<Value>)> {
        let previous = self.fetch(key)?;
        let mut ops = vec![BatchOp::Remove {
            tree: self.name.clone(),
            key: key.to_vec(),
        }];
        if let Some(old) = &previous {
            let indexes = IndexManager::new(self.engine(), &self.name, defs);
            ops.extend(indexes.stale_ops(key, old, None));
        }
        Ok((ops, previous))
    }

    pub(crate) fn apply(&self, ops: &[BatchOp]) -> CoreResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        self.engine.apply(ops).for_operator(&self.name)
    }

    /// Removes every record and index entry.
    pub(crate) fn trancate(&self) -> CoreResult<()> {
        let defs = self.write()?;
        self.engine.clear(&self.name).for_operator(&self.name)?;
        IndexManager::new(self.engine(), &self.name, &defs).clear()?;
        info!(operator = %self.name, "operator truncated");
        Ok(())
    }

    /// Creates and fills an index. Returns `false` if `def.path()` is
    /// already indexed.
    pub(crate) fn create_index(&self, def: IndexDefinition) -> CoreResult<bool> {
        let mut defs = self.write()?;
        if defs.iter().any(|d| d.path() == def.path()) {
            return Ok(false);
        }
        let entries = IndexManager::new(self.engine(), &self.name, &[]).build(&def)?;
        defs.push(def);
        Catalog::new(self.engine()).save(&self.descriptor(&defs))?;
        info!(
            operator = %self.name,
            column = %defs[defs.len() - 1].column_name(),
            entries,
            "index created"
        );
        Ok(true)
    }

    /// Drops the index over `path`.
    pub(crate) fn delete_index(&self, path: &[String]) -> CoreResult<()> {
        let mut defs = self.write()?;
        let position = defs
            .iter()
            .position(|d| d.path() == path)
            .ok_or_else(|| CoreError::index_not_found(path))?;
        let def = defs.remove(position);
        IndexManager::new(self.engine(), &self.name, std::slice::from_ref(&def)).drop_trees()?;
        Catalog::new(self.engine()).save(&self.descriptor(&defs))?;
        info!(operator = %self.name, column = %def.column_name(), "index deleted");
        Ok(())
    }
}

impl std::fmt::Debug for OperatorCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorCore")
            .field("name", &self.name)
            .field("kind", &self.mode.kind)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
