//! Lat/lon operators: documents keyed by position plus a secondary key.
//!
//! ## Key Format
//!
//! ```text
//! | geo key (u64 BE, Z-order) | secondary key |
//! ```
//!
//! The secondary key uses the operator's declared key type when it has
//! one, and a generated [`SequenceId`] otherwise. Records at the same
//! position therefore sort by secondary key.
//!
//! ## Distance Queries
//!
//! `range([lat, lon, meters])` scans the key intervals of a quadtree
//! cover of the disc's bounding box and drops candidates whose cell
//! centre is farther than `meters` from the query cell centre.

use super::keyed::{arity_error, corrupt_key, KeyLayout, ScanPlan};
use super::{Interval, Key, RowFilter};
use crate::error::{CoreError, CoreResult};
use crate::index::prefix_successor;
use crate::mode::{OperatorKind, OperatorMode};
use crate::sequence::{SequenceGenerator, SequenceId};
use std::ops::Bound;
use strata_codec::geo::GEO_KEY_LEN;
use strata_codec::{GeoKey, Value};

/// Key layout of [`super::LatLonOperator`].
#[derive(Debug, Clone, Copy)]
pub struct LatLonKeys;

fn coordinate(value: &Value, axis: &str) -> CoreResult<f64> {
    value.as_float().ok_or_else(|| {
        CoreError::type_mismatch(format!("{axis} must be a number, got {}", value.type_name()))
    })
}

fn geo_key(lat: &Value, lon: &Value) -> CoreResult<GeoKey> {
    Ok(GeoKey::encode(
        coordinate(lat, "latitude")?,
        coordinate(lon, "longitude")?,
    )?)
}

fn secondary(mode: &OperatorMode, value: &Value) -> CoreResult<Vec<u8>> {
    match mode.key_type {
        Some(key_type) => Ok(key_type.encode(value)?),
        None => Ok(SequenceId::from_value(value)?.as_bytes().to_vec()),
    }
}

fn compose(geo: GeoKey, secondary: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(GEO_KEY_LEN + secondary.len());
    key.extend_from_slice(&geo.to_bytes());
    key.extend_from_slice(secondary);
    key
}

impl KeyLayout for LatLonKeys {
    const KIND: OperatorKind = OperatorKind::LatLon;

    fn primary_key(mode: &OperatorMode, keys: &[Value]) -> CoreResult<Vec<u8>> {
        let [lat, lon, sec] = keys else {
            return Err(arity_error(keys, "[lat, lon, secondary]"));
        };
        Ok(compose(geo_key(lat, lon)?, &secondary(mode, sec)?))
    }

    fn put_key(
        mode: &OperatorMode,
        ids: &SequenceGenerator,
        keys: &[Value],
    ) -> CoreResult<(Vec<u8>, Option<Value>)> {
        match keys {
            [lat, lon] => {
                if let Some(key_type) = mode.key_type {
                    return Err(CoreError::configuration(format!(
                        "operator has {key_type} secondary keys; pass [lat, lon, key]"
                    )));
                }
                let geo = geo_key(lat, lon)?;
                let id = ids.next_id()?;
                Ok((compose(geo, id.as_bytes()), Some(id.to_value())))
            }
            [_, _, sec] => {
                let key = Self::primary_key(mode, keys)?;
                if mode.key_type.is_none() {
                    ids.observe(SequenceId::from_value(sec)?)?;
                }
                Ok((key, None))
            }
            _ => Err(arity_error(keys, "[lat, lon] or [lat, lon, secondary]")),
        }
    }

    fn cursor_plan(mode: &OperatorMode, keys: &[Value], desc: bool) -> CoreResult<ScanPlan> {
        let start = match keys {
            [] => Bound::Unbounded,
            [lat, lon] => {
                let prefix = geo_key(lat, lon)?.to_bytes();
                if desc {
                    prefix_successor(&prefix)
                } else {
                    Bound::Included(prefix.to_vec())
                }
            }
            [_, _, _] => Bound::Included(Self::primary_key(mode, keys)?),
            _ => return Err(arity_error(keys, "[], [lat, lon] or [lat, lon, secondary]")),
        };
        Ok(ScanPlan::from_start(start, desc))
    }

    fn range_plan(_mode: &OperatorMode, keys: &[Value]) -> CoreResult<ScanPlan> {
        let [lat, lon, distance] = keys else {
            return Err(arity_error(keys, "[lat, lon, meters]"));
        };
        let center = geo_key(lat, lon)?;
        let meters = coordinate(distance, "distance")?;
        let intervals = center
            .range_bounds(meters)?
            .into_iter()
            .map(|range| Interval {
                lower: Bound::Included(range.start.to_be_bytes().to_vec()),
                upper: range
                    .end
                    .checked_add(1)
                    .map_or(Bound::Unbounded, |end| Bound::Excluded(end.to_be_bytes().to_vec())),
            })
            .collect();
        Ok(ScanPlan {
            intervals,
            filter: RowFilter::Within { center, meters },
        })
    }

    fn restore_key(mode: &OperatorMode, bytes: &[u8]) -> CoreResult<Key> {
        let geo = GeoKey::from_slice(bytes).map_err(corrupt_key)?;
        let rest = &bytes[GEO_KEY_LEN..];
        let secondary = match mode.key_type {
            Some(key_type) => key_type.decode(rest).map_err(corrupt_key)?.to_value(),
            None => SequenceId::from_slice(rest).map_err(corrupt_key)?.to_value(),
        };
        let (lat, lon) = geo.decode();
        Ok(vec![Value::Float(lat), Value::Float(lon), secondary])
    }
}
