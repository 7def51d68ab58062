//! Per-operator mode: kind, key type and engine tuning.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use strata_codec::{KeyType, Value};

/// The four operator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatorKind {
    /// Documents under a single typed primary key.
    Object,
    /// Documents under a geographic key plus a secondary key.
    #[serde(rename = "latlon")]
    LatLon,
    /// Documents under time-ordered sequence ids.
    Sequence,
    /// FIFO queue of documents.
    Queue,
}

impl OperatorKind {
    /// The kind tag written to catalogs and backups.
    pub const fn as_str(self) -> &'static str {
        match self {
            OperatorKind::Object => "object",
            OperatorKind::LatLon => "latlon",
            OperatorKind::Sequence => "sequence",
            OperatorKind::Queue => "queue",
        }
    }

    /// Parses a kind tag.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "object" => Some(OperatorKind::Object),
            "latlon" => Some(OperatorKind::LatLon),
            "sequence" => Some(OperatorKind::Sequence),
            "queue" => Some(OperatorKind::Queue),
            _ => None,
        }
    }

    /// Whether operators of this kind support secondary indexes.
    pub const fn supports_indexes(self) -> bool {
        !matches!(self, OperatorKind::Queue)
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings captured when an operator is created.
///
/// Changing a mode requires deleting and recreating the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorMode {
    /// Operator kind.
    pub kind: OperatorKind,
    /// Declared key type: the primary key for objects, the secondary key
    /// for lat/lon operators. `None` means generated sequence ids.
    pub key_type: Option<KeyType>,
    /// Engine write buffer size in bytes.
    pub write_buffer: u32,
    /// Engine open file limit.
    pub max_open_files: u32,
    /// Engine block size in bytes.
    pub block_size: u32,
    /// Engine block cache size in bytes.
    pub block_cache: u32,
}

impl OperatorMode {
    /// Creates a mode with default engine tuning.
    #[must_use]
    pub const fn new(kind: OperatorKind, key_type: Option<KeyType>) -> Self {
        Self {
            kind,
            key_type,
            write_buffer: 4 * 1024 * 1024,
            max_open_files: 1000,
            block_size: 4 * 1024,
            block_cache: 8 * 1024 * 1024,
        }
    }

    /// Sets the key type.
    #[must_use]
    pub const fn with_key_type(mut self, key_type: Option<KeyType>) -> Self {
        self.key_type = key_type;
        self
    }

    /// Sets the write buffer size.
    #[must_use]
    pub const fn write_buffer(mut self, bytes: u32) -> Self {
        self.write_buffer = bytes;
        self
    }

    /// Sets the block cache size.
    #[must_use]
    pub const fn block_cache(mut self, bytes: u32) -> Self {
        self.block_cache = bytes;
        self
    }

    /// Reads a host-style mode map.
    ///
    /// The key type comes from `type` (or `operatorType`) as a key type
    /// alias; `"none"` or absence means no key type. Tuning fields are
    /// `writeBuffer`, `maxOpenFile`, `blockSize` and `blockCache`. The kind
    /// is read from `@operator` when present.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a non-map value, an unknown key
    /// type alias or an unknown kind tag.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        if !value.is_map() {
            return Err(CoreError::configuration("operator mode must be a map"));
        }

        let kind = match value.get("@operator").and_then(Value::as_text) {
            Some(tag) => OperatorKind::parse(tag)
                .ok_or_else(|| CoreError::configuration(format!("unknown operator kind {tag:?}")))?,
            None => OperatorKind::Object,
        };

        let key_type = match value.get("type").or_else(|| value.get("operatorType")) {
            None | Some(Value::Null) => None,
            Some(Value::Text(alias)) if alias.eq_ignore_ascii_case("none") => None,
            Some(Value::Text(alias)) => Some(KeyType::parse(alias).ok_or_else(|| {
                CoreError::configuration(format!("unknown key type {alias:?}"))
            })?),
            Some(other) => {
                return Err(CoreError::configuration(format!(
                    "key type must be text, got {}",
                    other.type_name()
                )))
            }
        };

        let mut mode = Self::new(kind, key_type);
        let tuning = |field: &str| {
            value
                .get(field)
                .and_then(Value::as_integer)
                .and_then(|n| u32::try_from(n).ok())
        };
        if let Some(n) = tuning("writeBuffer") {
            mode.write_buffer = n;
        }
        if let Some(n) = tuning("maxOpenFile") {
            mode.max_open_files = n;
        }
        if let Some(n) = tuning("blockSize") {
            mode.block_size = n;
        }
        if let Some(n) = tuning("blockCache") {
            mode.block_cache = n;
        }
        Ok(mode)
    }

    /// The mode map written to catalogs and backup headers.
    pub fn to_value(&self) -> Value {
        let (storage, key) = match self.key_type {
            Some(t) => (t.storage_class(), t.name()),
            None => ("none", "none"),
        };
        Value::document([
            ("leveldbType", Value::from(storage)),
            ("operatorType", Value::from(key)),
            ("writeBuffer", Value::from(self.write_buffer)),
            ("maxOpenFile", Value::from(self.max_open_files)),
            ("blockSize", Value::from(self.block_size)),
            ("blockCache", Value::from(self.block_cache)),
        ])
    }
}

impl Default for OperatorMode {
    fn default() -> Self {
        Self::new(OperatorKind::Object, Some(KeyType::String))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_defaults() {
        let mode = OperatorMode::new(OperatorKind::Queue, None);
        assert_eq!(mode.write_buffer, 4 * 1024 * 1024);
        assert_eq!(mode.max_open_files, 1000);
        assert_eq!(mode.block_size, 4096);
        assert_eq!(mode.block_cache, 8 * 1024 * 1024);
    }

    #[test]
    fn from_host_map_with_alias() {
        let value = Value::document([
            ("operatorType", Value::from("N64")),
            ("blockSize", Value::from(8192)),
            ("maxOpenFile", Value::from(-1)),
        ]);
        let mode = OperatorMode::from_value(&value).unwrap();
        assert_eq!(mode.kind, OperatorKind::Object);
        assert_eq!(mode.key_type, Some(KeyType::Int64));
        assert_eq!(mode.block_size, 8192);
        assert_eq!(mode.max_open_files, 1000);
    }

    #[test]
    fn mode_map_round_trips() {
        let mode = OperatorMode::new(OperatorKind::LatLon, Some(KeyType::Date)).write_buffer(1024);
        let map = mode.to_value();
        assert_eq!(map.get("leveldbType"), Some(&Value::from("number32")));
        assert_eq!(map.get("operatorType"), Some(&Value::from("date")));

        let mut parsed = OperatorMode::from_value(&map).unwrap();
        parsed.kind = OperatorKind::LatLon;
        assert_eq!(parsed, mode);

        let none = OperatorMode::new(OperatorKind::Sequence, None).to_value();
        assert_eq!(none.get("leveldbType"), Some(&Value::from("none")));
        assert_eq!(OperatorMode::from_value(&none).unwrap().key_type, None);
    }

    #[test]
    fn bad_mode_maps_are_rejected() {
        let unknown = Value::document([("type", "blob")]);
        assert!(matches!(
            OperatorMode::from_value(&unknown),
            Err(CoreError::Configuration { .. })
        ));
        let kind = Value::document([("@operator", "table")]);
        assert!(OperatorMode::from_value(&kind).is_err());
        assert!(OperatorMode::from_value(&Value::from(3)).is_err());
    }

    #[test]
    fn kind_tags() {
        for kind in [
            OperatorKind::Object,
            OperatorKind::LatLon,
            OperatorKind::Sequence,
            OperatorKind::Queue,
        ] {
            assert_eq!(OperatorKind::parse(kind.as_str()), Some(kind));
        }
        assert!(!OperatorKind::Queue.supports_indexes());
    }
}
