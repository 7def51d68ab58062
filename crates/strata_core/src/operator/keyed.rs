//! The index-capable operator kinds, generic over their key layout.

use super::cursor::KeyDecoder;
use super::{
    check_document, Cursor, Document, Interval, Key, Operator, OperatorCore, RowFilter,
    SearchOperator,
};
use crate::error::{CoreError, CoreResult};
use crate::index::{prefix_successor, split_path, IndexDefinition};
use crate::mode::{OperatorKind, OperatorMode};
use crate::sequence::SequenceGenerator;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_codec::Value;
use strata_storage::BatchOp;
use tracing::debug;

/// Key intervals to scan, in ascending key order, plus a row filter.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    pub(crate) intervals: Vec<Interval>,
    pub(crate) filter: RowFilter,
}

impl ScanPlan {
    /// Everything from `start` onwards in scan direction.
    pub(crate) fn from_start(start: Bound<Vec<u8>>, desc: bool) -> Self {
        let interval = if desc {
            Interval {
                lower: Bound::Unbounded,
                upper: start,
            }
        } else {
            Interval {
                lower: start,
                upper: Bound::Unbounded,
            }
        };
        Self {
            intervals: vec![interval],
            filter: RowFilter::All,
        }
    }

    /// The closed interval between two keys given in either order.
    pub(crate) fn between(a: Vec<u8>, b: Vec<u8>) -> Self {
        let (lower, upper) = if a <= b { (a, b) } else { (b, a) };
        Self {
            intervals: vec![Interval {
                lower: Bound::Included(lower),
                upper: Bound::Included(upper),
            }],
            filter: RowFilter::All,
        }
    }
}

/// Maps dynamic key arguments of one operator kind to engine key bytes.
///
/// Implemented by [`super::ObjectKeys`], [`super::LatLonKeys`] and
/// [`super::SequenceKeys`].
pub trait KeyLayout: Send + Sync + 'static {
    /// Kind served by this layout.
    const KIND: OperatorKind;

    /// Encodes a complete key for point reads and removes.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for bad arity, or a type mismatch.
    fn primary_key(mode: &OperatorMode, keys: &[Value]) -> CoreResult<Vec<u8>>;

    /// Encodes the key a `put` writes to, generating one if `keys` leaves
    /// it open. The generated key is returned as its restored value.
    ///
    /// # Errors
    ///
    /// Same as [`KeyLayout::primary_key`].
    fn put_key(
        mode: &OperatorMode,
        ids: &SequenceGenerator,
        keys: &[Value],
    ) -> CoreResult<(Vec<u8>, Option<Value>)>;

    /// Plans a full scan from an optional (possibly partial) start key.
    ///
    /// # Errors
    ///
    /// Same as [`KeyLayout::primary_key`].
    fn cursor_plan(mode: &OperatorMode, keys: &[Value], desc: bool) -> CoreResult<ScanPlan>;

    /// Plans a bounded scan.
    ///
    /// # Errors
    ///
    /// Same as [`KeyLayout::primary_key`].
    fn range_plan(mode: &OperatorMode, keys: &[Value]) -> CoreResult<ScanPlan>;

    /// Restores key components from stored key bytes.
    ///
    /// # Errors
    ///
    /// Returns corrupt data for bytes this layout never writes.
    fn restore_key(mode: &OperatorMode, bytes: &[u8]) -> CoreResult<Key>;
}

/// Fails unless exactly `expected` key components were given.
pub(crate) fn expect_arity(keys: &[Value], expected: usize, shape: &str) -> CoreResult<()> {
    if keys.len() == expected {
        Ok(())
    } else {
        Err(arity_error(keys, shape))
    }
}

pub(crate) fn arity_error(keys: &[Value], shape: &str) -> CoreError {
    CoreError::configuration(format!(
        "expected key {shape}, got {} component(s)",
        keys.len()
    ))
}

pub(crate) fn corrupt_key(err: impl std::fmt::Display) -> CoreError {
    CoreError::corrupt_data(format!("stored key: {err}"))
}

/// A handle over an object, lat/lon or sequence operator.
///
/// Shared handles from [`crate::OperatorManager::get`] write straight to
/// the engine. Write batch handles from
/// [`crate::OperatorManager::get_write_batch`] buffer their writes until
/// [`Operator::commit`]; their reads see committed state only.
pub struct KeyedOperator<L> {
    core: Arc<OperatorCore>,
    batch: Option<Mutex<Vec<BatchOp>>>,
    closed: AtomicBool,
    layout: PhantomData<fn() -> L>,
}

impl<L: KeyLayout> KeyedOperator<L> {
    pub(crate) fn open(core: Arc<OperatorCore>, write_batch: bool) -> Self {
        Self {
            core,
            batch: write_batch.then(|| Mutex::new(Vec::new())),
            closed: AtomicBool::new(false),
            layout: PhantomData,
        }
    }

    fn restore_key() -> KeyDecoder {
        L::restore_key
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::already_closed(format!(
                "write batch on {}",
                self.core.name()
            )));
        }
        Ok(())
    }

    fn read(&self) -> CoreResult<super::inner::ReadGuard<'_>> {
        self.ensure_open()?;
        self.core.read()
    }

    fn batch(&self) -> CoreResult<&Mutex<Vec<BatchOp>>> {
        self.batch.as_ref().ok_or_else(|| {
            CoreError::configuration(format!("{} is not a write batch handle", self.core.name()))
        })
    }

    fn find_index(defs: &[IndexDefinition], path: &[&str]) -> CoreResult<IndexDefinition> {
        let path = split_path(path);
        defs.iter()
            .find(|d| d.path() == path.as_slice())
            .cloned()
            .ok_or_else(|| CoreError::index_not_found(&path))
    }

    /// Number of buffered operations, engine-level, including index
    /// entries. Always zero for shared handles.
    pub fn pending(&self) -> usize {
        self.batch.as_ref().map_or(0, |b| b.lock().len())
    }
}

impl<L: KeyLayout> Operator for KeyedOperator<L> {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> OperatorKind {
        L::KIND
    }

    fn mode(&self) -> &OperatorMode {
        self.core.mode()
    }

    fn is_available(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.core.is_closed()
    }

    fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn len(&self) -> CoreResult<usize> {
        let _defs = self.read()?;
        self.core.len()
    }

    fn close(&self) -> CoreResult<()> {
        match &self.batch {
            Some(buffer) => {
                if !self.closed.swap(true, Ordering::AcqRel) {
                    let discarded = std::mem::take(&mut *buffer.lock()).len();
                    debug!(operator = %self.core.name(), discarded, "write batch closed");
                }
            }
            None => self.core.close(),
        }
        Ok(())
    }

    fn trancate(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.core.trancate()
    }

    fn is_write_batch(&self) -> bool {
        self.batch.is_some()
    }

    fn commit(&self) -> CoreResult<()> {
        let buffer = self.batch()?;
        self.ensure_open()?;
        // Exclusive: a concurrent backup sees all of the batch or none.
        let _defs = self.core.write()?;
        let mut pending = buffer.lock();
        // The buffer is only drained once the engine has taken the batch.
        self.core.apply(&pending)?;
        let ops = std::mem::take(&mut *pending).len();
        debug!(operator = %self.core.name(), ops, "write batch committed");
        Ok(())
    }

    fn rollback(&self) -> CoreResult<()> {
        let buffer = self.batch()?;
        self.ensure_open()?;
        let discarded = std::mem::take(&mut *buffer.lock()).len();
        debug!(operator = %self.core.name(), discarded, "write batch rolled back");
        Ok(())
    }
}

impl<L: KeyLayout> SearchOperator for KeyedOperator<L> {
    fn get(&self, keys: &[Value]) -> CoreResult<Option<Document>> {
        let _defs = self.read()?;
        let key = L::primary_key(self.core.mode(), keys)?;
        self.core.fetch(&key)
    }

    fn put(&self, keys: &[Value], doc: Document) -> CoreResult<Option<Value>> {
        check_document(&doc)?;
        let defs = self.read()?;
        let (key, generated) = L::put_key(self.core.mode(), self.core.ids(), keys)?;
        let previous = match &self.batch {
            Some(buffer) => {
                let (ops, previous) = self.core.stage_store(&defs, &key, &doc)?;
                buffer.lock().extend(ops);
                previous
            }
            None => self.core.store(&defs, &key, &doc)?,
        };
        Ok(generated.or(previous))
    }

    fn remove(&self, keys: &[Value]) -> CoreResult<Option<Document>> {
        let defs = self.read()?;
        let key = L::primary_key(self.core.mode(), keys)?;
        match &self.batch {
            Some(buffer) => {
                let (ops, previous) = self.core.stage_delete(&defs, &key)?;
                buffer.lock().extend(ops);
                Ok(previous)
            }
            None => self.core.delete(&defs, &key),
        }
    }

    fn contains(&self, keys: &[Value]) -> CoreResult<bool> {
        let _defs = self.read()?;
        let key = L::primary_key(self.core.mode(), keys)?;
        self.core.contains_key(&key)
    }

    fn cursor(&self, desc: bool, keys: &[Value]) -> CoreResult<Cursor> {
        let _defs = self.read()?;
        let plan = L::cursor_plan(self.core.mode(), keys, desc)?;
        Ok(Cursor::primary(
            Arc::clone(&self.core),
            Self::restore_key(),
            plan.intervals,
            plan.filter,
            desc,
        ))
    }

    fn range(&self, desc: bool, keys: &[Value]) -> CoreResult<Cursor> {
        let _defs = self.read()?;
        let plan = L::range_plan(self.core.mode(), keys)?;
        Ok(Cursor::primary(
            Arc::clone(&self.core),
            Self::restore_key(),
            plan.intervals,
            plan.filter,
            desc,
        ))
    }

    fn create_index(&self, column_type: &str, path: &[&str]) -> CoreResult<bool> {
        self.ensure_open()?;
        let def = IndexDefinition::parse(column_type, path)?;
        self.core.create_index(def)
    }

    fn delete_index(&self, path: &[&str]) -> CoreResult<()> {
        self.ensure_open()?;
        self.core.delete_index(&split_path(path))
    }

    fn is_index(&self, path: &[&str]) -> CoreResult<bool> {
        let defs = self.read()?;
        let path = split_path(path);
        Ok(defs.iter().any(|d| d.path() == path.as_slice()))
    }

    fn index_size(&self) -> CoreResult<usize> {
        Ok(self.read()?.len())
    }

    fn index_columns(&self) -> CoreResult<Vec<IndexDefinition>> {
        Ok(self.read()?.clone())
    }

    fn index(&self, desc: bool, key: Option<&Value>, path: &[&str]) -> CoreResult<Cursor> {
        let defs = self.read()?;
        let def = Self::find_index(&defs, path)?;
        let interval = match key {
            None => Interval::all(),
            Some(value) => {
                let prefix = def.column_type().coerce(value)?.encode_delimited();
                Interval {
                    upper: prefix_successor(&prefix),
                    lower: Bound::Included(prefix),
                }
            }
        };
        Ok(Cursor::index(
            Arc::clone(&self.core),
            Self::restore_key(),
            def,
            interval,
            desc,
        ))
    }

    fn index_range(
        &self,
        desc: bool,
        start: &Value,
        end: &Value,
        path: &[&str],
    ) -> CoreResult<Cursor> {
        let defs = self.read()?;
        let def = Self::find_index(&defs, path)?;
        let a = def.column_type().coerce(start)?.encode_delimited();
        let b = def.column_type().coerce(end)?.encode_delimited();
        let (lower, upper) = if a <= b { (a, b) } else { (b, a) };
        let interval = Interval {
            upper: prefix_successor(&upper),
            lower: Bound::Included(lower),
        };
        Ok(Cursor::index(
            Arc::clone(&self.core),
            Self::restore_key(),
            def,
            interval,
            desc,
        ))
    }
}

impl<L: KeyLayout> std::fmt::Debug for KeyedOperator<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedOperator")
            .field("name", &self.core.name())
            .field("kind", &L::KIND)
            .field("write_batch", &self.batch.is_some())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
