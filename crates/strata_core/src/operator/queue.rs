//! FIFO queue operators.

use super::sequence::SequenceKeys;
use super::{
    check_document, decode_document, Cursor, Document, Interval, KeyLayout, Operator,
    OperatorCore, RowFilter,
};
use crate::error::{CoreError, CoreResult, EngineContext};
use crate::mode::{OperatorKind, OperatorMode};
use std::ops::Bound;
use std::sync::Arc;

/// A FIFO queue of documents keyed by [`crate::SequenceId`].
///
/// Producers and consumers hold the operator's lock shared, so offers and
/// pops run concurrently; `close` and `trancate` wait for them. Ordering
/// comes from the id generator and the engine's per-key atomicity: each
/// record is popped by exactly one consumer.
pub struct QueueOperator {
    core: Arc<OperatorCore>,
}

impl QueueOperator {
    pub(crate) fn new(core: Arc<OperatorCore>) -> Self {
        Self { core }
    }

    /// Appends `doc` at the tail. Always returns `true`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed`, or a configuration error if `doc` is not a
    /// map.
    pub fn offer(&self, doc: Document) -> CoreResult<bool> {
        check_document(&doc)?;
        let _defs = self.core.read()?;
        let id = self.core.ids().next_id()?;
        self.core.store(&[], id.as_bytes(), &doc)?;
        Ok(true)
    }

    /// Removes and returns the oldest document.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed`, or an engine error.
    pub fn pop(&self) -> CoreResult<Option<Document>> {
        let _defs = self.core.read()?;
        let name = self.core.name();
        loop {
            let Some((key, _)) = self
                .core
                .engine()
                .seek(name, Bound::Unbounded, false)
                .for_operator(name)?
            else {
                return Ok(None);
            };
            // Another consumer may take the head between seek and remove.
            if let Some(bytes) = self.core.engine().remove(name, &key).for_operator(name)? {
                return decode_document(name, &bytes).map(Some);
            }
        }
    }

    /// Returns the oldest document without removing it.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed`, or an engine error.
    pub fn peek(&self) -> CoreResult<Option<Document>> {
        let _defs = self.core.read()?;
        let name = self.core.name();
        self.core
            .engine()
            .seek(name, Bound::Unbounded, false)
            .for_operator(name)?
            .map(|(_, bytes)| decode_document(name, &bytes))
            .transpose()
    }

    /// Scans the queue without consuming it, oldest first unless `desc`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed`.
    pub fn cursor(&self, desc: bool) -> CoreResult<Cursor> {
        let _defs = self.core.read()?;
        Ok(Cursor::primary(
            Arc::clone(&self.core),
            SequenceKeys::restore_key,
            vec![Interval::all()],
            RowFilter::All,
            desc,
        ))
    }

    fn not_a_batch(&self) -> CoreError {
        CoreError::configuration(format!(
            "queue {} does not support write batches",
            self.core.name()
        ))
    }
}

impl Operator for QueueOperator {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> OperatorKind {
        OperatorKind::Queue
    }

    fn mode(&self) -> &OperatorMode {
        self.core.mode()
    }

    fn is_available(&self) -> bool {
        !self.core.is_closed()
    }

    fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn len(&self) -> CoreResult<usize> {
        let _defs = self.core.read()?;
        self.core.len()
    }

    fn close(&self) -> CoreResult<()> {
        self.core.close();
        Ok(())
    }

    fn trancate(&self) -> CoreResult<()> {
        self.core.trancate()
    }

    fn is_write_batch(&self) -> bool {
        false
    }

    fn commit(&self) -> CoreResult<()> {
        Err(self.not_a_batch())
    }

    fn rollback(&self) -> CoreResult<()> {
        Err(self.not_a_batch())
    }
}

impl std::fmt::Debug for QueueOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueOperator")
            .field("name", &self.core.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::OperatorDescriptor;
    use crate::sequence::SequenceGenerator;
    use strata_codec::Value;
    use strata_storage::{KvEngine, OrderedEngine};

    fn queue() -> QueueOperator {
        let engine: Arc<dyn KvEngine> = Arc::new(OrderedEngine::in_memory());
        engine.create_tree("jobs").unwrap();
        let core = OperatorCore::new(
            OperatorDescriptor::new("jobs", OperatorMode::new(OperatorKind::Queue, None)),
            engine,
            Arc::new(SequenceGenerator::new(0).unwrap()),
        );
        QueueOperator::new(Arc::new(core))
    }

    #[test]
    fn fifo_order() {
        let queue = queue();
        for task in 1..=3 {
            assert!(queue.offer(Value::document([("task", task)])).unwrap());
        }
        assert_eq!(queue.len().unwrap(), 3);
        assert_eq!(queue.peek().unwrap(), Some(Value::document([("task", 1)])));
        for task in 1..=3 {
            assert_eq!(queue.pop().unwrap(), Some(Value::document([("task", task)])));
        }
        assert_eq!(queue.pop().unwrap(), None);
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn cursor_does_not_consume() {
        let queue = queue();
        queue.offer(Value::document([("task", 1)])).unwrap();
        queue.offer(Value::document([("task", 2)])).unwrap();
        let tasks: Vec<_> = queue
            .cursor(true)
            .unwrap()
            .map(|row| row.unwrap().1)
            .collect();
        assert_eq!(
            tasks,
            vec![Value::document([("task", 2)]), Value::document([("task", 1)])]
        );
        assert_eq!(queue.len().unwrap(), 2);
    }

    #[test]
    fn queues_reject_batches_and_non_maps() {
        let queue = queue();
        assert!(matches!(queue.commit(), Err(CoreError::Configuration { .. })));
        assert!(matches!(
            queue.offer(Value::from(1)),
            Err(CoreError::Configuration { .. })
        ));
        queue.close().unwrap();
        assert!(matches!(
            queue.offer(Value::document([("task", 1)])),
            Err(CoreError::AlreadyClosed { .. })
        ));
    }
}
