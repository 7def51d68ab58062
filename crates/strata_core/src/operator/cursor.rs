//! Pull cursors over primary and index trees.

use super::{decode_document, Document, Key, OperatorCore};
use crate::error::{CoreError, CoreResult, EngineContext};
use crate::index::{index_tree, IndexDefinition};
use crate::mode::OperatorMode;
use std::ops::Bound;
use std::sync::Arc;
use strata_codec::GeoKey;

/// Restores the dynamic key components from primary key bytes.
pub(crate) type KeyDecoder = fn(&OperatorMode, &[u8]) -> CoreResult<Key>;

/// A key interval over one tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Interval {
    pub(crate) lower: Bound<Vec<u8>>,
    pub(crate) upper: Bound<Vec<u8>>,
}

impl Interval {
    pub(crate) fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// Where a scan in the given direction begins.
    fn start(&self, desc: bool) -> Bound<&[u8]> {
        let bound = if desc { &self.upper } else { &self.lower };
        match bound {
            Bound::Included(key) => Bound::Included(key.as_slice()),
            Bound::Excluded(key) => Bound::Excluded(key.as_slice()),
            Bound::Unbounded => Bound::Unbounded,
        }
    }

    fn admits(&self, key: &[u8]) -> bool {
        let above = match &self.lower {
            Bound::Included(lower) => key >= lower.as_slice(),
            Bound::Excluded(lower) => key > lower.as_slice(),
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(upper) => key <= upper.as_slice(),
            Bound::Excluded(upper) => key < upper.as_slice(),
            Bound::Unbounded => true,
        };
        above && below
    }
}

/// Per-row check applied after the key interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum RowFilter {
    All,
    /// Keep rows whose geo prefix lies within `meters` of `center`.
    Within { center: GeoKey, meters: f64 },
}

impl RowFilter {
    fn admits(&self, primary_key: &[u8]) -> bool {
        match self {
            RowFilter::All => true,
            RowFilter::Within { center, meters } => GeoKey::from_slice(primary_key)
                .map(|key| key.distance_to(*center) <= *meters)
                .unwrap_or(false),
        }
    }
}

#[derive(Debug)]
enum Source {
    Primary,
    Index(IndexDefinition),
}

/// A finite, non-restartable scan yielding `(Key, Document)` pairs.
///
/// A cursor holds no lock between steps. Each step takes the operator's
/// shared lock, seeks past the last key it saw and releases the lock, so a
/// long scan never blocks `close` or index changes and observes concurrent
/// writes that land ahead of it.
///
/// Index cursors re-read each referenced document and skip entries whose
/// live field value no longer matches the entry.
///
/// Steps after [`Cursor::close`], or after the operator or its manager
/// closed, fail with `AlreadyClosed`. Dropping a cursor closes it.
pub struct Cursor {
    core: Arc<OperatorCore>,
    restore_key: KeyDecoder,
    source: Source,
    tree: String,
    intervals: Vec<Interval>,
    filter: RowFilter,
    desc: bool,
    /// Position in scan order within `intervals`.
    interval: usize,
    /// Last raw key read from `tree` in the current interval.
    position: Option<Vec<u8>>,
    peeked: Option<(Key, Document)>,
    key: Option<Key>,
    closed: bool,
    failed: bool,
}

impl Cursor {
    fn new(
        core: Arc<OperatorCore>,
        restore_key: KeyDecoder,
        source: Source,
        intervals: Vec<Interval>,
        filter: RowFilter,
        desc: bool,
    ) -> Self {
        let tree = match &source {
            Source::Primary => core.name().to_string(),
            Source::Index(def) => index_tree(core.name(), def.path()),
        };
        Self {
            core,
            restore_key,
            source,
            tree,
            intervals,
            filter,
            desc,
            interval: 0,
            position: None,
            peeked: None,
            key: None,
            closed: false,
            failed: false,
        }
    }

    pub(crate) fn primary(
        core: Arc<OperatorCore>,
        restore_key: KeyDecoder,
        intervals: Vec<Interval>,
        filter: RowFilter,
        desc: bool,
    ) -> Self {
        Self::new(core, restore_key, Source::Primary, intervals, filter, desc)
    }

    pub(crate) fn index(
        core: Arc<OperatorCore>,
        restore_key: KeyDecoder,
        def: IndexDefinition,
        interval: Interval,
        desc: bool,
    ) -> Self {
        Self::new(
            core,
            restore_key,
            Source::Index(def),
            vec![interval],
            RowFilter::All,
            desc,
        )
    }

    /// Whether another pair is available, reading ahead by one.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` after close, or an engine error.
    pub fn has_next(&mut self) -> CoreResult<bool> {
        if self.peeked.is_none() {
            self.peeked = self.step()?;
        }
        Ok(self.peeked.is_some())
    }

    /// Returns the next pair, or `None` at the end of the scan.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` after close, or an engine error.
    pub fn next_entry(&mut self) -> CoreResult<Option<(Key, Document)>> {
        let row = match self.peeked.take() {
            Some(row) => {
                self.ensure_open()?;
                Some(row)
            }
            None => self.step()?,
        };
        if let Some((key, _)) = &row {
            self.key = Some(key.clone());
        }
        Ok(row)
    }

    /// Key of the pair most recently returned.
    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    /// Whether the scan runs in descending key order.
    pub fn is_desc(&self) -> bool {
        self.desc
    }

    /// Whether [`Cursor::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Releases the cursor. Further steps fail.
    pub fn close(&mut self) {
        self.closed = true;
        self.peeked = None;
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed {
            return Err(CoreError::already_closed(format!(
                "cursor over {}",
                self.core.name()
            )));
        }
        if self.core.is_closed() {
            return Err(CoreError::already_closed(self.core.name()));
        }
        Ok(())
    }

    fn step(&mut self) -> CoreResult<Option<(Key, Document)>> {
        self.ensure_open()?;
        let core = Arc::clone(&self.core);
        let _guard = core.read()?;

        while self.interval < self.intervals.len() {
            let slot = if self.desc {
                self.intervals.len() - 1 - self.interval
            } else {
                self.interval
            };
            let interval = &self.intervals[slot];
            let from = match &self.position {
                Some(last) => Bound::Excluded(last.as_slice()),
                None => interval.start(self.desc),
            };
            let found = core
                .engine()
                .seek(&self.tree, from, self.desc)
                .for_operator(core.name())?
                .filter(|(raw, _)| interval.admits(raw));

            let Some((raw, value)) = found else {
                self.interval += 1;
                self.position = None;
                continue;
            };
            let row = self.resolve(&raw, &value)?;
            self.position = Some(raw);
            if row.is_some() {
                return Ok(row);
            }
        }
        Ok(None)
    }

    fn resolve(&self, raw: &[u8], value: &[u8]) -> CoreResult<Option<(Key, Document)>> {
        let mode = self.core.mode();
        match &self.source {
            Source::Primary => {
                if !self.filter.admits(raw) {
                    return Ok(None);
                }
                let key = (self.restore_key)(mode, raw)?;
                let doc = decode_document(self.core.name(), value)?;
                Ok(Some((key, doc)))
            }
            Source::Index(def) => {
                let (field, primary_key) =
                    def.column_type().split_delimited(raw).map_err(|e| {
                        CoreError::corrupt_data(format!(
                            "index entry in {}: {e}",
                            def.column_name()
                        ))
                    })?;
                let Some(doc) = self.core.fetch(primary_key)? else {
                    return Ok(None);
                };
                if def.extract(&doc).as_ref() != Some(&field) {
                    return Ok(None);
                }
                let key = (self.restore_key)(mode, primary_key)?;
                Ok(Some((key, doc)))
            }
        }
    }
}

impl Iterator for Cursor {
    type Item = CoreResult<(Key, Document)>;

    /// Yields at most one error, then ends.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_entry() {
            Ok(row) => row.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("operator", &self.core.name())
            .field("source", &self.source)
            .field("desc", &self.desc)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
