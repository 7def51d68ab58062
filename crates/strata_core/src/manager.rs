//! The operator manager: name-level registry over one engine.

use crate::backup::{BackupConfig, BackupManager, BackupResult, RestoreResult};
use crate::catalog::{creatable_mode, validate_name, Catalog, OperatorDescriptor};
use crate::config::ManagerConfig;
use crate::error::{CoreError, CoreResult, EngineContext};
use crate::index::IndexManager;
use crate::mode::{OperatorKind, OperatorMode};
use crate::operator::{Handle, OperatorCore};
use crate::sequence::{SequenceGenerator, SequenceId};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_codec::{KeyType, Value};
use strata_storage::{KvEngine, OrderedEngine};
use tracing::{debug, info, warn};

pub(crate) type Registry = HashMap<String, Arc<OperatorCore>>;

/// Owns the engine and every operator living on it.
///
/// Structural operations (`create*`, `delete`, `rename`) and the header
/// phase of backup and restore take the registry lock exclusively;
/// lookups take it shared. Locks are then handed down to the per-operator
/// lock, never the other way round.
///
/// ## Example
///
/// ```rust
/// use strata_core::{ManagerConfig, OperatorManager, SearchOperator};
/// use strata_codec::{KeyType, Value};
///
/// let manager = OperatorManager::open(ManagerConfig::default()).unwrap();
/// manager.create_object("users", KeyType::String).unwrap();
///
/// let users = manager.get("users").unwrap().into_object().unwrap();
/// users
///     .put(&[Value::from("u1")], Value::document([("name", "Ann")]))
///     .unwrap();
/// assert!(users.contains(&[Value::from("u1")]).unwrap());
/// ```
pub struct OperatorManager {
    config: ManagerConfig,
    engine: Arc<dyn KvEngine>,
    ids: Arc<SequenceGenerator>,
    operators: RwLock<Registry>,
    closed: AtomicBool,
}

impl OperatorManager {
    /// Opens a manager: in memory when `config.path` is `None`, otherwise
    /// over the engine log in that directory, reloading every operator
    /// recorded in its catalog.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid config, or an engine
    /// error if the log cannot be opened or replayed.
    pub fn open(config: ManagerConfig) -> CoreResult<Self> {
        config.validate()?;
        let engine: Arc<dyn KvEngine> = match &config.path {
            Some(path) => Arc::new(OrderedEngine::open(path, config.sync_on_write)?),
            None => Arc::new(OrderedEngine::in_memory()),
        };
        Self::with_engine(engine, config)
    }

    /// Opens a manager over an existing engine. `config.path` is ignored.
    ///
    /// # Errors
    ///
    /// Same as [`OperatorManager::open`].
    pub fn with_engine(engine: Arc<dyn KvEngine>, config: ManagerConfig) -> CoreResult<Self> {
        config.validate()?;
        let ids = Arc::new(SequenceGenerator::new(config.machine_id)?);

        let catalog = Catalog::new(engine.as_ref());
        catalog.ensure()?;
        let mut operators = Registry::new();
        for descriptor in catalog.load_all()? {
            engine.create_tree(&descriptor.name).for_operator(&descriptor.name)?;
            IndexManager::new(engine.as_ref(), &descriptor.name, &descriptor.indexes)
                .create_trees()?;
            if matches!(descriptor.mode.kind, OperatorKind::Sequence | OperatorKind::Queue) {
                observe_newest(engine.as_ref(), &ids, &descriptor.name)?;
            }
            debug!(
                operator = %descriptor.name,
                kind = %descriptor.mode.kind,
                indexes = descriptor.indexes.len(),
                "operator loaded from catalog"
            );
            let name = descriptor.name.clone();
            let core = OperatorCore::new(descriptor, Arc::clone(&engine), Arc::clone(&ids));
            operators.insert(name, Arc::new(core));
        }

        info!(
            machine_id = config.machine_id,
            persistent = config.path.is_some(),
            operators = operators.len(),
            "operator manager opened"
        );
        Ok(Self {
            config,
            engine,
            ids,
            operators: RwLock::new(operators),
            closed: AtomicBool::new(false),
        })
    }

    /// The configuration this manager was opened with.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The engine every operator lives on.
    pub fn engine(&self) -> &Arc<dyn KvEngine> {
        &self.engine
    }

    /// Whether [`OperatorManager::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn read(&self) -> CoreResult<RwLockReadGuard<'_, Registry>> {
        let guard = self.operators.read_recursive();
        if self.is_closed() {
            return Err(CoreError::already_closed("manager"));
        }
        Ok(guard)
    }

    pub(crate) fn write(&self) -> CoreResult<RwLockWriteGuard<'_, Registry>> {
        let guard = self.operators.write();
        if self.is_closed() {
            return Err(CoreError::already_closed("manager"));
        }
        Ok(guard)
    }

    /// Creates an operator. Returns `false` if the name is taken.
    ///
    /// Object operators need a key type; sequence and queue operators
    /// never have one, whatever `mode` says.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a bad name or mode.
    pub fn create(&self, name: &str, mode: OperatorMode) -> CoreResult<bool> {
        let mode = creatable_mode(name, mode)?;
        let mut operators = self.write()?;
        if operators.contains_key(name) {
            return Ok(false);
        }
        let kind = mode.kind;
        self.insert_locked(&mut operators, OperatorDescriptor::new(name, mode))?;
        info!(operator = name, %kind, "operator created");
        Ok(true)
    }

    /// Creates an operator from a host-style mode map such as
    /// `{ "type": "n64", "blockSize": 8192 }`.
    ///
    /// # Errors
    ///
    /// Same as [`OperatorManager::create`], plus a configuration error for
    /// a malformed map.
    pub fn create_from_value(
        &self,
        name: &str,
        kind: OperatorKind,
        config: &Value,
    ) -> CoreResult<bool> {
        let mut mode = OperatorMode::from_value(config)?;
        mode.kind = kind;
        self.create(name, mode)
    }

    /// Creates an object operator keyed by `key_type`.
    ///
    /// # Errors
    ///
    /// See [`OperatorManager::create`].
    pub fn create_object(&self, name: &str, key_type: KeyType) -> CoreResult<bool> {
        self.create(name, OperatorMode::new(OperatorKind::Object, Some(key_type)))
    }

    /// Creates a lat/lon operator. Without a key type, secondary keys are
    /// generated sequence ids.
    ///
    /// # Errors
    ///
    /// See [`OperatorManager::create`].
    pub fn create_lat_lon(&self, name: &str, key_type: Option<KeyType>) -> CoreResult<bool> {
        self.create(name, OperatorMode::new(OperatorKind::LatLon, key_type))
    }

    /// Creates a sequence operator.
    ///
    /// # Errors
    ///
    /// See [`OperatorManager::create`].
    pub fn create_sequence(&self, name: &str) -> CoreResult<bool> {
        self.create(name, OperatorMode::new(OperatorKind::Sequence, None))
    }

    /// Creates a queue operator.
    ///
    /// # Errors
    ///
    /// See [`OperatorManager::create`].
    pub fn create_queue(&self, name: &str) -> CoreResult<bool> {
        self.create(name, OperatorMode::new(OperatorKind::Queue, None))
    }

    /// Deletes an operator with its records and indexes. Returns `false`
    /// if there is no such operator. Open handles fail from then on.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` after close, or an engine error.
    pub fn delete(&self, name: &str) -> CoreResult<bool> {
        let mut operators = self.write()?;
        let deleted = self.remove_locked(&mut operators, name)?;
        if deleted {
            info!(operator = name, "operator deleted");
        }
        Ok(deleted)
    }

    /// Renames an operator. Returns `false` if `old` is missing or `new`
    /// is taken. Handles on the old name are closed.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a bad new name, or an engine
    /// error.
    pub fn rename(&self, old: &str, new: &str) -> CoreResult<bool> {
        validate_name(new)?;
        let mut operators = self.write()?;
        if operators.contains_key(new) {
            return Ok(false);
        }
        let Some(core) = operators.get(old).cloned() else {
            return Ok(false);
        };
        core.close();
        let previous = core.snapshot();

        // Until the tree has moved the closed core stays registered under
        // `old`, and the next lookup reopens it.
        if !self.engine.rename_tree(old, new).for_operator(old)? {
            warn!(from = old, to = new, "engine tree already taken; rename skipped");
            return Ok(false);
        }
        operators.remove(old);
        IndexManager::new(self.engine.as_ref(), old, &previous.indexes).rename_trees(new)?;

        let catalog = Catalog::new(self.engine.as_ref());
        catalog.remove(old)?;
        let descriptor = OperatorDescriptor {
            name: new.to_string(),
            ..previous
        };
        catalog.save(&descriptor)?;
        let core = OperatorCore::new(descriptor, Arc::clone(&self.engine), Arc::clone(&self.ids));
        operators.insert(new.to_string(), Arc::new(core));
        info!(from = old, to = new, "operator renamed");
        Ok(true)
    }

    /// Whether an operator named `name` exists.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` after close.
    pub fn contains(&self, name: &str) -> CoreResult<bool> {
        Ok(self.read()?.contains_key(name))
    }

    /// Returns a shared handle. An operator closed through a handle is
    /// reopened.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown name.
    pub fn get(&self, name: &str) -> CoreResult<Handle> {
        Ok(Handle::open(self.core(name)?, false))
    }

    /// Returns a write batch handle that buffers writes until commit.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown name, or a configuration error
    /// for queues.
    pub fn get_write_batch(&self, name: &str) -> CoreResult<Handle> {
        let core = self.core(name)?;
        if core.mode().kind == OperatorKind::Queue {
            return Err(CoreError::configuration(format!(
                "queue {name} does not support write batches"
            )));
        }
        Ok(Handle::open(core, true))
    }

    /// Operator names in sorted order.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` after close.
    pub fn names(&self) -> CoreResult<Vec<String>> {
        let mut names: Vec<String> = self.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Number of operators.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` after close.
    pub fn size(&self) -> CoreResult<usize> {
        Ok(self.read()?.len())
    }

    /// Writes a backup of `name` to `out` with the configured block size.
    ///
    /// # Errors
    ///
    /// See [`BackupManager::backup`].
    pub fn backup<W: Write>(&self, name: &str, out: &mut W) -> CoreResult<BackupResult> {
        self.backups().backup(self, name, out)
    }

    /// Restores an operator from a backup stream, replacing any operator
    /// of the same name.
    ///
    /// # Errors
    ///
    /// See [`BackupManager::restore`].
    pub fn restore<R: Read>(&self, input: &mut R) -> CoreResult<RestoreResult> {
        self.backups().restore(self, input)
    }

    fn backups(&self) -> BackupManager {
        BackupManager::new(BackupConfig::from_manager(&self.config))
    }

    /// Closes every operator, then the engine. Later calls fail with
    /// `AlreadyClosed`; closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the log cannot be flushed.
    pub fn close(&self) -> CoreResult<()> {
        let operators = self.operators.write();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for core in operators.values() {
            core.close();
        }
        self.engine.close()?;
        info!(operators = operators.len(), "operator manager closed");
        Ok(())
    }

    /// Looks up a live operator core, reopening one closed by a handle.
    pub(crate) fn core(&self, name: &str) -> CoreResult<Arc<OperatorCore>> {
        {
            let operators = self.read()?;
            match operators.get(name) {
                None => return Err(CoreError::operator_not_found(name)),
                Some(core) if !core.is_closed() => return Ok(Arc::clone(core)),
                Some(_) => {}
            }
        }

        let mut operators = self.write()?;
        let core = operators
            .get(name)
            .ok_or_else(|| CoreError::operator_not_found(name))?;
        if !core.is_closed() {
            return Ok(Arc::clone(core));
        }
        let reopened = Arc::new(OperatorCore::new(
            core.snapshot(),
            Arc::clone(&self.engine),
            Arc::clone(&self.ids),
        ));
        operators.insert(name.to_string(), Arc::clone(&reopened));
        debug!(operator = name, "operator reopened");
        Ok(reopened)
    }

    /// Creates trees and the catalog record for `descriptor` and registers
    /// it. The caller holds the registry write lock.
    ///
    /// Reserved and registered names are refused; an unregistered tree
    /// left behind under the name is cleared.
    pub(crate) fn insert_locked(
        &self,
        operators: &mut Registry,
        descriptor: OperatorDescriptor,
    ) -> CoreResult<Arc<OperatorCore>> {
        let name = descriptor.name.clone();
        validate_name(&name)?;
        if operators.contains_key(&name) {
            return Err(CoreError::configuration(format!(
                "operator {name} already exists"
            )));
        }
        if !self.engine.create_tree(&name).for_operator(&name)? {
            warn!(operator = %name, "clearing orphaned engine tree");
            self.engine.clear(&name).for_operator(&name)?;
        }
        IndexManager::new(self.engine.as_ref(), &name, &descriptor.indexes).create_trees()?;
        Catalog::new(self.engine.as_ref()).save(&descriptor)?;
        let core = Arc::new(OperatorCore::new(
            descriptor,
            Arc::clone(&self.engine),
            Arc::clone(&self.ids),
        ));
        operators.insert(name, Arc::clone(&core));
        Ok(core)
    }

    /// Closes and drops `name` with its trees and catalog record. The
    /// caller holds the registry write lock.
    pub(crate) fn remove_locked(&self, operators: &mut Registry, name: &str) -> CoreResult<bool> {
        let Some(core) = operators.remove(name) else {
            return Ok(false);
        };
        core.close();
        let descriptor = core.snapshot();
        self.engine.drop_tree(name).for_operator(name)?;
        IndexManager::new(self.engine.as_ref(), name, &descriptor.indexes).drop_trees()?;
        Catalog::new(self.engine.as_ref()).remove(name)?;
        Ok(true)
    }
}

/// Advances `ids` past the newest id stored in a sequence or queue tree.
pub(crate) fn observe_newest(
    engine: &dyn KvEngine,
    ids: &SequenceGenerator,
    name: &str,
) -> CoreResult<()> {
    if let Some((key, _)) = engine.seek(name, Bound::Unbounded, true).for_operator(name)? {
        match SequenceId::from_slice(&key) {
            Ok(id) => ids.observe(id).map_err(|e| {
                CoreError::corrupt_data(format!("newest id of {name}: {e}"))
            })?,
            Err(err) => warn!(operator = name, error = %err, "newest key is not a sequence id"),
        }
    }
    Ok(())
}

impl Drop for OperatorManager {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "closing operator manager on drop failed");
        }
    }
}

impl std::fmt::Debug for OperatorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorManager")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::{Operator, SearchOperator};

    fn manager() -> OperatorManager {
        OperatorManager::open(ManagerConfig::default()).unwrap()
    }

    #[test]
    fn create_rules() {
        let manager = manager();
        assert!(manager.create_object("users", KeyType::String).unwrap());
        assert!(!manager.create_object("users", KeyType::Int64).unwrap());
        assert!(!manager.create_queue("users").unwrap());

        let untyped = OperatorMode::new(OperatorKind::Object, None);
        assert!(matches!(
            manager.create("bad", untyped),
            Err(CoreError::Configuration { .. })
        ));
        assert!(matches!(
            manager.create_sequence(""),
            Err(CoreError::Configuration { .. })
        ));

        let typed = OperatorMode::new(OperatorKind::Sequence, Some(KeyType::String));
        assert!(manager.create("events", typed).unwrap());
        assert_eq!(manager.get("events").unwrap().as_operator().mode().key_type, None);
        assert_eq!(manager.names().unwrap(), vec!["events", "users"]);
        assert_eq!(manager.size().unwrap(), 2);
    }

    #[test]
    fn create_from_host_map() {
        let manager = manager();
        let config = Value::document([("type", "n64"), ("blockSize", "x")]);
        assert!(manager
            .create_from_value("ids", OperatorKind::Object, &config)
            .unwrap());
        let handle = manager.get("ids").unwrap();
        assert_eq!(handle.kind(), OperatorKind::Object);
        assert_eq!(handle.as_operator().mode().key_type, Some(KeyType::Int64));
    }

    #[test]
    fn unknown_names_are_not_found() {
        let manager = manager();
        assert!(matches!(manager.get("nope"), Err(CoreError::NotFound { .. })));
        assert!(!manager.delete("nope").unwrap());
        assert!(!manager.rename("nope", "other").unwrap());
    }

    #[test]
    fn rename_moves_records_and_indexes() {
        let manager = manager();
        manager.create_object("old", KeyType::String).unwrap();
        let old = manager.get("old").unwrap().into_object().unwrap();
        old.create_index("int", &["n"]).unwrap();
        old.put(&[Value::from("a")], Value::document([("n", 1)])).unwrap();

        assert!(manager.rename("old", "new").unwrap());
        assert!(!old.is_available());
        assert!(matches!(
            old.get(&[Value::from("a")]),
            Err(CoreError::AlreadyClosed { .. })
        ));

        let new = manager.get("new").unwrap().into_object().unwrap();
        assert_eq!(
            new.get(&[Value::from("a")]).unwrap(),
            Some(Value::document([("n", 1)]))
        );
        assert!(new.is_index(&["n"]).unwrap());
        assert_eq!(new.index(false, Some(&Value::from(1)), &["n"]).unwrap().count(), 1);
        assert!(!manager.contains("old").unwrap());
    }

    #[test]
    fn blocked_rename_keeps_the_operator() {
        let manager = manager();
        manager.create_object("old", KeyType::String).unwrap();
        let old = manager.get("old").unwrap().into_object().unwrap();
        old.put(&[Value::from("a")], Value::document([("n", 1)])).unwrap();
        manager.engine().create_tree("new").unwrap();

        assert!(!manager.rename("old", "new").unwrap());
        assert_eq!(manager.names().unwrap(), vec!["old"]);
        let again = manager.get("old").unwrap().into_object().unwrap();
        assert_eq!(
            again.get(&[Value::from("a")]).unwrap(),
            Some(Value::document([("n", 1)]))
        );
    }

    #[test]
    fn insert_refuses_reserved_and_taken_names() {
        let manager = manager();
        manager.create_object("users", KeyType::String).unwrap();
        let mut operators = manager.write().unwrap();
        let reserved = OperatorDescriptor::new(
            crate::catalog::CATALOG_TREE,
            OperatorMode::new(OperatorKind::Queue, None),
        );
        assert!(matches!(
            manager.insert_locked(&mut operators, reserved),
            Err(CoreError::Configuration { .. })
        ));
        let taken = OperatorDescriptor::new("users", OperatorMode::new(OperatorKind::Queue, None));
        assert!(matches!(
            manager.insert_locked(&mut operators, taken),
            Err(CoreError::Configuration { .. })
        ));
        drop(operators);
        assert_eq!(manager.names().unwrap(), vec!["users"]);
    }

    #[test]
    fn closed_handles_are_reopened_by_get() {
        let manager = manager();
        manager.create_object("users", KeyType::String).unwrap();
        let users = manager.get("users").unwrap();
        users.as_operator().close().unwrap();
        assert!(!users.as_operator().is_available());

        let again = manager.get("users").unwrap();
        assert!(again.as_operator().is_available());
        assert!(again.as_operator().is_empty().unwrap());
    }

    #[test]
    fn queues_have_no_write_batch() {
        let manager = manager();
        manager.create_queue("jobs").unwrap();
        assert!(matches!(
            manager.get_write_batch("jobs"),
            Err(CoreError::Configuration { .. })
        ));
        assert!(matches!(
            manager.get("jobs").unwrap().into_object(),
            Err(CoreError::Configuration { .. })
        ));
    }

    #[test]
    fn close_closes_everything() {
        let manager = manager();
        manager.create_object("users", KeyType::String).unwrap();
        let users = manager.get("users").unwrap().into_object().unwrap();
        manager.close().unwrap();
        manager.close().unwrap();

        assert!(matches!(manager.names(), Err(CoreError::AlreadyClosed { .. })));
        assert!(matches!(
            users.put(&[Value::from("a")], Value::document([("n", 1)])),
            Err(CoreError::AlreadyClosed { .. })
        ));
    }
}
