//! Sequence operators: documents under time-ordered sequence ids.

use super::keyed::{arity_error, corrupt_key, expect_arity, KeyLayout, ScanPlan};
use super::Key;
use crate::error::CoreResult;
use crate::mode::{OperatorKind, OperatorMode};
use crate::sequence::{SequenceGenerator, SequenceId};
use std::ops::Bound;
use strata_codec::Value;

/// Key layout of [`super::SequenceOperator`]: the 12 bytes of a
/// [`SequenceId`]. Ids are accepted as hex text or raw bytes and restored
/// as hex text.
#[derive(Debug, Clone, Copy)]
pub struct SequenceKeys;

fn id_bytes(value: &Value) -> CoreResult<Vec<u8>> {
    Ok(SequenceId::from_value(value)?.as_bytes().to_vec())
}

impl KeyLayout for SequenceKeys {
    const KIND: OperatorKind = OperatorKind::Sequence;

    fn primary_key(_mode: &OperatorMode, keys: &[Value]) -> CoreResult<Vec<u8>> {
        expect_arity(keys, 1, "[id]")?;
        id_bytes(&keys[0])
    }

    fn put_key(
        _mode: &OperatorMode,
        ids: &SequenceGenerator,
        keys: &[Value],
    ) -> CoreResult<(Vec<u8>, Option<Value>)> {
        match keys {
            [] => {
                let id = ids.next_id()?;
                Ok((id.as_bytes().to_vec(), Some(id.to_value())))
            }
            [id] => {
                let id = SequenceId::from_value(id)?;
                ids.observe(id)?;
                Ok((id.as_bytes().to_vec(), None))
            }
            _ => Err(arity_error(keys, "[] or [id]")),
        }
    }

    fn cursor_plan(_mode: &OperatorMode, keys: &[Value], desc: bool) -> CoreResult<ScanPlan> {
        let start = match keys {
            [] => Bound::Unbounded,
            [id] => Bound::Included(id_bytes(id)?),
            _ => return Err(arity_error(keys, "[] or [start]")),
        };
        Ok(ScanPlan::from_start(start, desc))
    }

    fn range_plan(_mode: &OperatorMode, keys: &[Value]) -> CoreResult<ScanPlan> {
        let [start, end] = keys else {
            return Err(arity_error(keys, "[start, end]"));
        };
        Ok(ScanPlan::between(id_bytes(start)?, id_bytes(end)?))
    }

    fn restore_key(_mode: &OperatorMode, bytes: &[u8]) -> CoreResult<Key> {
        let id = SequenceId::from_slice(bytes).map_err(corrupt_key)?;
        Ok(vec![id.to_value()])
    }
}
