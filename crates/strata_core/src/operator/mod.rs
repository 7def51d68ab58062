//! Operators: typed handles over one named document collection.
//!
//! Four kinds share one operator core: the engine handle, the mode, the
//! index definitions and a reentrant read-write lock.
//!
//! | kind | primary key | handle |
//! |------|-------------|--------|
//! | object | one value of the declared [`KeyType`](strata_codec::KeyType) | [`ObjectOperator`] |
//! | latlon | [`GeoKey`](strata_codec::GeoKey) ++ secondary key | [`LatLonOperator`] |
//! | sequence | [`SequenceId`](crate::SequenceId) | [`SequenceOperator`] |
//! | queue | [`SequenceId`](crate::SequenceId), FIFO | [`QueueOperator`] |
//!
//! The three index-capable kinds are one generic type,
//! [`KeyedOperator`], parameterised by a [`KeyLayout`] that maps dynamic
//! key arguments to engine key bytes and back.

mod cursor;
mod inner;
mod keyed;
mod latlon;
mod object;
mod queue;
mod sequence;

pub use cursor::Cursor;
pub(crate) use inner::OperatorCore;
pub(crate) use cursor::{Interval, RowFilter};
pub use keyed::{KeyLayout, KeyedOperator, ScanPlan};
pub use latlon::LatLonKeys;
pub use object::ObjectKeys;
pub use queue::QueueOperator;
pub use sequence::SequenceKeys;

use crate::error::{CoreError, CoreResult};
use crate::index::IndexDefinition;
use crate::mode::{OperatorKind, OperatorMode};
use std::sync::Arc;
use strata_codec::{from_cbor, to_canonical_cbor, Value};

/// A restored key: one value per key component.
///
/// Objects restore as `[key]`, lat/lon records as `[lat, lon, secondary]`
/// and sequence or queue records as `[id]` with the id in hex.
pub type Key = Vec<Value>;

/// The structured value half of a record. Always a map when written
/// through an operator.
pub type Document = Value;

/// Document collection keyed by one typed value.
pub type ObjectOperator = KeyedOperator<ObjectKeys>;

/// Geospatial collection keyed by position plus a secondary key.
pub type LatLonOperator = KeyedOperator<LatLonKeys>;

/// Time-ordered collection keyed by sequence ids.
pub type SequenceOperator = KeyedOperator<SequenceKeys>;

/// Lifecycle operations every operator handle supports.
pub trait Operator: Send + Sync {
    /// Operator name.
    fn name(&self) -> &str;

    /// Operator kind.
    fn kind(&self) -> OperatorKind;

    /// Mode captured at creation.
    fn mode(&self) -> &OperatorMode;

    /// Whether neither this handle nor the operator has been closed.
    fn is_available(&self) -> bool;

    /// Whether the operator holds no records.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` on a closed handle.
    fn is_empty(&self) -> CoreResult<bool>;

    /// Number of records.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` on a closed handle.
    fn len(&self) -> CoreResult<usize>;

    /// Closes this handle.
    ///
    /// Closing a shared handle closes the operator for every holder until
    /// the manager hands it out again. Closing a write batch discards its
    /// buffered writes. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Reserved for handles whose release touches the engine.
    fn close(&self) -> CoreResult<()>;

    /// Removes every record and index entry.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` on a closed handle, or an engine error.
    fn trancate(&self) -> CoreResult<()>;

    /// Whether writes through this handle are buffered until
    /// [`Operator::commit`].
    fn is_write_batch(&self) -> bool;

    /// Applies buffered writes atomically.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if this is not a write batch handle.
    fn commit(&self) -> CoreResult<()>;

    /// Discards buffered writes.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if this is not a write batch handle.
    fn rollback(&self) -> CoreResult<()>;
}

/// Keyed reads, writes, scans and secondary indexes.
///
/// Key arguments are the dynamic key components for the operator kind.
/// Passing the wrong number of components is a configuration error.
pub trait SearchOperator: Operator {
    /// Reads the document under `keys`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed`, a configuration error for bad arity, or a
    /// type mismatch for a key that does not fit its declared type.
    fn get(&self, keys: &[Value]) -> CoreResult<Option<Document>>;

    /// Writes `doc` under `keys`.
    ///
    /// Returns the generated key when one was assigned, otherwise the
    /// document that was replaced. Write batch handles report the
    /// committed document, ignoring their own buffered writes.
    ///
    /// # Errors
    ///
    /// Same as [`SearchOperator::get`], plus a configuration error if
    /// `doc` is not a map.
    fn put(&self, keys: &[Value], doc: Document) -> CoreResult<Option<Value>>;

    /// Removes the document under `keys`, returning it.
    ///
    /// # Errors
    ///
    /// Same as [`SearchOperator::get`].
    fn remove(&self, keys: &[Value]) -> CoreResult<Option<Document>>;

    /// Whether a document exists under `keys`.
    ///
    /// # Errors
    ///
    /// Same as [`SearchOperator::get`].
    fn contains(&self, keys: &[Value]) -> CoreResult<bool>;

    /// Scans every record from an optional start key.
    ///
    /// # Errors
    ///
    /// Same as [`SearchOperator::get`].
    fn cursor(&self, desc: bool, keys: &[Value]) -> CoreResult<Cursor>;

    /// Scans a bounded key range. Objects and sequences take
    /// `[start, end]` (inclusive, either order); lat/lon operators take
    /// `[lat, lon, meters]`.
    ///
    /// # Errors
    ///
    /// Same as [`SearchOperator::get`].
    fn range(&self, desc: bool, keys: &[Value]) -> CoreResult<Cursor>;

    /// Creates and fills an index over `path`. Returns `false` if one
    /// already exists.
    ///
    /// # Errors
    ///
    /// Returns a type mismatch for a column type that cannot be indexed.
    fn create_index(&self, column_type: &str, path: &[&str]) -> CoreResult<bool>;

    /// Drops the index over `path`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no such index.
    fn delete_index(&self, path: &[&str]) -> CoreResult<()>;

    /// Whether an index over `path` exists.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` on a closed handle.
    fn is_index(&self, path: &[&str]) -> CoreResult<bool>;

    /// Number of indexes.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` on a closed handle.
    fn index_size(&self) -> CoreResult<usize>;

    /// Index definitions in creation order.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` on a closed handle.
    fn index_columns(&self) -> CoreResult<Vec<IndexDefinition>>;

    /// Scans the index over `path`: every entry when `key` is `None`,
    /// otherwise the entries whose field equals `key`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown index, or a type mismatch if
    /// `key` does not fit the column type.
    fn index(&self, desc: bool, key: Option<&Value>, path: &[&str]) -> CoreResult<Cursor>;

    /// Scans the index over `path` for field values between `start` and
    /// `end` inclusive, in either order.
    ///
    /// # Errors
    ///
    /// Same as [`SearchOperator::index`].
    fn index_range(
        &self,
        desc: bool,
        start: &Value,
        end: &Value,
        path: &[&str],
    ) -> CoreResult<Cursor>;
}

/// A handle returned by the manager, one variant per kind.
pub enum Handle {
    /// Object operator.
    Object(ObjectOperator),
    /// Lat/lon operator.
    LatLon(LatLonOperator),
    /// Sequence operator.
    Sequence(SequenceOperator),
    /// Queue operator.
    Queue(QueueOperator),
}

impl Handle {
    pub(crate) fn open(core: Arc<OperatorCore>, write_batch: bool) -> Self {
        match core.mode().kind {
            OperatorKind::Object => Handle::Object(KeyedOperator::open(core, write_batch)),
            OperatorKind::LatLon => Handle::LatLon(KeyedOperator::open(core, write_batch)),
            OperatorKind::Sequence => Handle::Sequence(KeyedOperator::open(core, write_batch)),
            OperatorKind::Queue => Handle::Queue(QueueOperator::new(core)),
        }
    }

    /// Operator kind.
    pub fn kind(&self) -> OperatorKind {
        self.as_operator().kind()
    }

    /// Lifecycle view of any handle.
    pub fn as_operator(&self) -> &dyn Operator {
        match self {
            Handle::Object(op) => op,
            Handle::LatLon(op) => op,
            Handle::Sequence(op) => op,
            Handle::Queue(op) => op,
        }
    }

    /// Keyed view, `None` for queues.
    pub fn as_search(&self) -> Option<&dyn SearchOperator> {
        match self {
            Handle::Object(op) => Some(op),
            Handle::LatLon(op) => Some(op),
            Handle::Sequence(op) => Some(op),
            Handle::Queue(_) => None,
        }
    }

    /// Unwraps an object handle.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for any other kind.
    pub fn into_object(self) -> CoreResult<ObjectOperator> {
        match self {
            Handle::Object(op) => Ok(op),
            other => Err(other.wrong_kind(OperatorKind::Object)),
        }
    }

    /// Unwraps a lat/lon handle.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for any other kind.
    pub fn into_lat_lon(self) -> CoreResult<LatLonOperator> {
        match self {
            Handle::LatLon(op) => Ok(op),
            other => Err(other.wrong_kind(OperatorKind::LatLon)),
        }
    }

    /// Unwraps a sequence handle.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for any other kind.
    pub fn into_sequence(self) -> CoreResult<SequenceOperator> {
        match self {
            Handle::Sequence(op) => Ok(op),
            other => Err(other.wrong_kind(OperatorKind::Sequence)),
        }
    }

    /// Unwraps a queue handle.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for any other kind.
    pub fn into_queue(self) -> CoreResult<QueueOperator> {
        match self {
            Handle::Queue(op) => Ok(op),
            other => Err(other.wrong_kind(OperatorKind::Queue)),
        }
    }

    fn wrong_kind(&self, wanted: OperatorKind) -> CoreError {
        CoreError::configuration(format!(
            "{} is a {} operator, not {wanted}",
            self.as_operator().name(),
            self.kind()
        ))
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = self.as_operator();
        f.debug_struct("Handle")
            .field("name", &op.name())
            .field("kind", &op.kind())
            .field("write_batch", &op.is_write_batch())
            .finish()
    }
}

pub(crate) fn encode_document(doc: &Value) -> CoreResult<Vec<u8>> {
    Ok(to_canonical_cbor(doc)?)
}

pub(crate) fn decode_document(operator: &str, bytes: &[u8]) -> CoreResult<Value> {
    from_cbor(bytes)
        .map_err(|e| CoreError::corrupt_data(format!("document in {operator}: {e}")))
}

pub(crate) fn check_document(doc: &Value) -> CoreResult<()> {
    if doc.is_map() {
        Ok(())
    } else {
        Err(CoreError::configuration(format!(
            "document must be a map, got {}",
            doc.type_name()
        )))
    }
}
