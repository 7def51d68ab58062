//! Operator descriptors and the persisted catalog.
//!
//! Every operator is described by its name, its [`OperatorMode`] and its
//! index definitions. The same description is written in two places:
//!
//! - the catalog tree, so a file-backed manager can reopen its operators
//! - the header block of a backup stream
//!
//! Both use the mode map: [`OperatorMode::to_value`] extended with
//! `@operator` (the kind tag) and, for index-capable kinds, `@index`
//! (a flat `[type0, path0, type1, path1, ...]` list where each path is an
//! array of text segments).

use crate::error::{CoreError, CoreResult, EngineContext};
use crate::index::IndexDefinition;
use crate::mode::{OperatorKind, OperatorMode};
use strata_codec::{from_cbor, to_canonical_cbor, KeyType, Value};
use strata_storage::KvEngine;

/// Tree holding one catalog record per operator.
pub(crate) const CATALOG_TREE: &str = "\0catalog";

const KIND_FIELD: &str = "@operator";
const INDEX_FIELD: &str = "@index";

/// Everything needed to recreate an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorDescriptor {
    /// Operator name.
    pub name: String,
    /// Mode captured at creation.
    pub mode: OperatorMode,
    /// Secondary index definitions, in creation order.
    pub indexes: Vec<IndexDefinition>,
}

impl OperatorDescriptor {
    /// Creates a descriptor with no indexes.
    pub fn new(name: impl Into<String>, mode: OperatorMode) -> Self {
        Self {
            name: name.into(),
            mode,
            indexes: Vec::new(),
        }
    }

    /// The mode map with `@operator` and `@index` attached.
    pub fn to_mode_map(&self) -> Value {
        let mut pairs = match self.mode.to_value() {
            Value::Map(pairs) => pairs,
            _ => Vec::new(),
        };
        pairs.push((Value::from(KIND_FIELD), Value::from(self.mode.kind.as_str())));
        if self.mode.kind.supports_indexes() {
            let mut flat = Vec::with_capacity(self.indexes.len() * 2);
            for def in &self.indexes {
                flat.push(Value::from(def.column_type().name()));
                flat.push(Value::Array(
                    def.path().iter().map(|s| Value::from(s.as_str())).collect(),
                ));
            }
            pairs.push((Value::from(INDEX_FIELD), Value::Array(flat)));
        }
        Value::map(pairs)
    }

    /// Reads a mode map written by [`OperatorDescriptor::to_mode_map`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a malformed map, or a type
    /// mismatch for an index column type that cannot be indexed.
    pub fn from_mode_map(name: impl Into<String>, map: &Value) -> CoreResult<Self> {
        let name = name.into();
        let mode = OperatorMode::from_value(map)?;
        let mut indexes = Vec::new();

        if let Some(entries) = map.get(INDEX_FIELD) {
            let flat = entries
                .as_array()
                .ok_or_else(|| CoreError::configuration(format!("{INDEX_FIELD} must be a list")))?;
            if flat.len() % 2 != 0 {
                return Err(CoreError::configuration(format!(
                    "{INDEX_FIELD} of {name} has an odd number of entries"
                )));
            }
            for pair in flat.chunks_exact(2) {
                let column_type = pair[0]
                    .as_text()
                    .and_then(KeyType::parse)
                    .ok_or_else(|| {
                        CoreError::configuration(format!("bad index column type in {name}"))
                    })?;
                let path = pair[1]
                    .as_array()
                    .and_then(|segments| {
                        segments
                            .iter()
                            .map(|s| s.as_text().map(str::to_string))
                            .collect::<Option<Vec<_>>>()
                    })
                    .ok_or_else(|| {
                        CoreError::configuration(format!("bad index column path in {name}"))
                    })?;
                indexes.push(IndexDefinition::new(column_type, path)?);
            }
        }

        Ok(Self {
            name,
            mode,
            indexes,
        })
    }
}

/// Reads and writes catalog records on the engine.
pub(crate) struct Catalog<'a> {
    engine: &'a dyn KvEngine,
}

impl<'a> Catalog<'a> {
    pub(crate) fn new(engine: &'a dyn KvEngine) -> Self {
        Self { engine }
    }

    /// Creates the catalog tree if it does not exist.
    pub(crate) fn ensure(&self) -> CoreResult<()> {
        self.engine.create_tree(CATALOG_TREE).for_operator("catalog")?;
        Ok(())
    }

    pub(crate) fn save(&self, descriptor: &OperatorDescriptor) -> CoreResult<()> {
        let bytes = to_canonical_cbor(&descriptor.to_mode_map())?;
        self.engine
            .put(CATALOG_TREE, descriptor.name.as_bytes(), &bytes)
            .for_operator("catalog")?;
        Ok(())
    }

    pub(crate) fn remove(&self, name: &str) -> CoreResult<()> {
        self.engine
            .remove(CATALOG_TREE, name.as_bytes())
            .for_operator("catalog")?;
        Ok(())
    }

    /// Loads every descriptor in name order.
    pub(crate) fn load_all(&self) -> CoreResult<Vec<OperatorDescriptor>> {
        let mut out = Vec::new();
        let mut from: Option<Vec<u8>> = None;
        loop {
            let bound = match &from {
                Some(key) => std::ops::Bound::Excluded(key.as_slice()),
                None => std::ops::Bound::Unbounded,
            };
            let Some((key, value)) = self
                .engine
                .seek(CATALOG_TREE, bound, false)
                .for_operator("catalog")?
            else {
                break;
            };
            let name = String::from_utf8(key.clone())
                .map_err(|_| CoreError::corrupt_data("catalog name is not UTF-8"))?;
            let map = from_cbor(&value).map_err(|e| {
                CoreError::corrupt_data(format!("catalog record for {name}: {e}"))
            })?;
            out.push(OperatorDescriptor::from_mode_map(name, &map)?);
            from = Some(key);
        }
        Ok(out)
    }
}

/// Checks an operator name.
pub(crate) fn validate_name(name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::configuration("operator name must not be empty"));
    }
    if name.contains('\0') {
        return Err(CoreError::configuration(format!(
            "operator name {name:?} contains NUL"
        )));
    }
    Ok(())
}

/// Checks `name` and applies the creation rules to `mode`: object
/// operators need a key type, sequence and queue operators never keep one.
pub(crate) fn creatable_mode(name: &str, mode: OperatorMode) -> CoreResult<OperatorMode> {
    validate_name(name)?;
    match mode.kind {
        OperatorKind::Object if mode.key_type.is_none() => Err(CoreError::configuration(
            format!("object operator {name} needs a key type"),
        )),
        OperatorKind::Sequence | OperatorKind::Queue => Ok(mode.with_key_type(None)),
        _ => Ok(mode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_storage::OrderedEngine;

    fn descriptor() -> OperatorDescriptor {
        let mut desc = OperatorDescriptor::new(
            "people",
            OperatorMode::new(OperatorKind::Object, Some(KeyType::Int64)),
        );
        desc.indexes
            .push(
                IndexDefinition::new(KeyType::String, vec!["address".into(), "city".into()])
                    .unwrap(),
            );
        desc.indexes
            .push(IndexDefinition::new(KeyType::Float64, vec!["score".into()]).unwrap());
        desc
    }

    #[test]
    fn mode_map_carries_kind_and_indexes() {
        let map = descriptor().to_mode_map();
        assert_eq!(map.get("@operator"), Some(&Value::from("object")));
        let flat = map.get("@index").and_then(Value::as_array).unwrap();
        assert_eq!(flat.len(), 4);
        assert_eq!(flat[0], Value::from("string"));
        assert_eq!(flat[1], Value::from(vec!["address", "city"]));

        let parsed = OperatorDescriptor::from_mode_map("people", &map).unwrap();
        assert_eq!(parsed, descriptor());
    }

    #[test]
    fn queue_maps_have_no_index_list() {
        let desc = OperatorDescriptor::new("jobs", OperatorMode::new(OperatorKind::Queue, None));
        let map = desc.to_mode_map();
        assert!(map.get("@index").is_none());
        let parsed = OperatorDescriptor::from_mode_map("jobs", &map).unwrap();
        assert_eq!(parsed.mode.kind, OperatorKind::Queue);
    }

    #[test]
    fn malformed_index_lists_are_rejected() {
        let map = Value::document([
            ("@operator", Value::from("object")),
            ("@index", Value::from(vec!["string"])),
        ]);
        assert!(matches!(
            OperatorDescriptor::from_mode_map("x", &map),
            Err(CoreError::Configuration { .. })
        ));
    }

    #[test]
    fn catalog_round_trip_on_engine() {
        let engine = OrderedEngine::in_memory();
        let catalog = Catalog::new(&engine);
        catalog.ensure().unwrap();
        catalog.save(&descriptor()).unwrap();
        catalog
            .save(&OperatorDescriptor::new(
                "events",
                OperatorMode::new(OperatorKind::Sequence, None),
            ))
            .unwrap();

        let all = catalog.load_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "events");
        assert_eq!(all[1], descriptor());

        catalog.remove("events").unwrap();
        assert_eq!(catalog.load_all().unwrap().len(), 1);
    }

    #[test]
    fn names_are_checked() {
        assert!(validate_name("users").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a\0b").is_err());
    }

    #[test]
    fn creation_rules_by_kind() {
        let untyped = OperatorMode::new(OperatorKind::Object, None);
        assert!(creatable_mode("users", untyped).is_err());
        assert!(creatable_mode(CATALOG_TREE, OperatorMode::new(OperatorKind::Queue, None)).is_err());

        let typed = OperatorMode::new(OperatorKind::Sequence, Some(KeyType::String));
        assert_eq!(creatable_mode("events", typed).unwrap().key_type, None);
    }
}
