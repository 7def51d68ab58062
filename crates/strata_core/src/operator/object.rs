//! Object operators: one typed primary key per document.

use super::keyed::{arity_error, corrupt_key, expect_arity, KeyLayout, ScanPlan};
use super::Key;
use crate::error::{CoreError, CoreResult};
use crate::mode::{OperatorKind, OperatorMode};
use crate::sequence::SequenceGenerator;
use std::ops::Bound;
use strata_codec::{KeyType, Value};

/// Key layout of [`super::ObjectOperator`]: the key encoded with the
/// operator's declared [`KeyType`].
#[derive(Debug, Clone, Copy)]
pub struct ObjectKeys;

fn key_type(mode: &OperatorMode) -> CoreResult<KeyType> {
    mode.key_type
        .ok_or_else(|| CoreError::configuration("object operator has no key type"))
}

impl KeyLayout for ObjectKeys {
    const KIND: OperatorKind = OperatorKind::Object;

    fn primary_key(mode: &OperatorMode, keys: &[Value]) -> CoreResult<Vec<u8>> {
        expect_arity(keys, 1, "[key]")?;
        Ok(key_type(mode)?.encode(&keys[0])?)
    }

    fn put_key(
        mode: &OperatorMode,
        _ids: &SequenceGenerator,
        keys: &[Value],
    ) -> CoreResult<(Vec<u8>, Option<Value>)> {
        Ok((Self::primary_key(mode, keys)?, None))
    }

    fn cursor_plan(mode: &OperatorMode, keys: &[Value], desc: bool) -> CoreResult<ScanPlan> {
        let start = match keys {
            [] => Bound::Unbounded,
            [key] => Bound::Included(key_type(mode)?.encode(key)?),
            _ => return Err(arity_error(keys, "[] or [start]")),
        };
        Ok(ScanPlan::from_start(start, desc))
    }

    fn range_plan(mode: &OperatorMode, keys: &[Value]) -> CoreResult<ScanPlan> {
        let [start, end] = keys else {
            return Err(arity_error(keys, "[start, end]"));
        };
        let key_type = key_type(mode)?;
        Ok(ScanPlan::between(
            key_type.encode(start)?,
            key_type.encode(end)?,
        ))
    }

    fn restore_key(mode: &OperatorMode, bytes: &[u8]) -> CoreResult<Key> {
        let key = key_type(mode)?.decode(bytes).map_err(corrupt_key)?;
        Ok(vec![key.to_value()])
    }
}
