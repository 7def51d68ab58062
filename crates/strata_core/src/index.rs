//! Secondary index definitions and maintenance.
//!
//! Each index is an engine tree named `{operator}\0idx\0{path...}` whose
//! keys are `delimited(field value) ++ primary key` with an empty value.
//! Because field values use the self-delimiting encoding of
//! [`KeyValue::encode_delimited`], entries for one field value form one
//! contiguous key range, ordered by primary key inside it.
//!
//! ## Consistency
//!
//! Writes through an operator keep indexes up to date on a best-effort
//! basis: new entries are written before the primary record, entries for
//! the replaced document's old field values are removed after it. Index
//! readers never trust an entry on its own. They fetch the live document,
//! re-extract the field and skip the entry unless the value still matches,
//! so a crash or a write that bypassed the operator can only leave stale
//! entries behind, never wrong results.

use crate::error::{CoreError, CoreResult, EngineContext};
use std::ops::Bound;
use strata_codec::{KeyType, KeyValue, Value};
use strata_storage::{BatchOp, KvEngine};

/// A secondary index over one field path of an operator's documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    column_type: KeyType,
    path: Vec<String>,
}

impl IndexDefinition {
    /// Creates a definition.
    ///
    /// # Errors
    ///
    /// Returns a type mismatch if `column_type` cannot be indexed, or a
    /// configuration error for an empty path or an empty segment.
    pub fn new(column_type: KeyType, path: Vec<String>) -> CoreResult<Self> {
        if !column_type.is_indexable() {
            return Err(CoreError::type_mismatch(format!(
                "{} columns cannot be indexed",
                column_type.name()
            )));
        }
        if path.is_empty() || path.iter().any(|s| s.is_empty() || s.contains('\0')) {
            return Err(CoreError::configuration(format!(
                "invalid index path {:?}",
                path.join(".")
            )));
        }
        Ok(Self { column_type, path })
    }

    /// Creates a definition from a key type alias and path segments, each
    /// of which may itself be dotted.
    ///
    /// # Errors
    ///
    /// Returns a type mismatch for an unknown or non-indexable alias.
    pub fn parse(column_type: &str, path: &[&str]) -> CoreResult<Self> {
        let key_type = KeyType::parse(column_type).ok_or_else(|| {
            CoreError::type_mismatch(format!("unknown index column type {column_type:?}"))
        })?;
        Self::new(key_type, split_path(path))
    }

    /// Declared type of the indexed field.
    pub fn column_type(&self) -> KeyType {
        self.column_type
    }

    /// Field path segments.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// The dotted column name, e.g. `address.city`.
    pub fn column_name(&self) -> String {
        self.path.join(".")
    }

    /// Reads the indexed field from `doc`, if present and coercible.
    pub(crate) fn extract(&self, doc: &Value) -> Option<KeyValue> {
        let field = doc.lookup(&self.path)?;
        if field.is_null() {
            return None;
        }
        self.column_type.coerce(field).ok()
    }

    /// The index entry key for `doc` stored under `primary_key`.
    pub(crate) fn entry_key(&self, doc: &Value, primary_key: &[u8]) -> Option<Vec<u8>> {
        self.extract(doc).map(|field| {
            let mut key = field.encode_delimited();
            key.extend_from_slice(primary_key);
            key
        })
    }
}

/// Splits dotted segments: `["address.city"]` and `["address", "city"]`
/// name the same path.
pub fn split_path(segments: &[&str]) -> Vec<String> {
    segments
        .iter()
        .flat_map(|s| s.split('.'))
        .map(str::to_string)
        .collect()
}

/// Engine tree holding entries for the index at `path` of `operator`.
pub(crate) fn index_tree(operator: &str, path: &[String]) -> String {
    let mut tree = format!("{operator}\0idx");
    for segment in path {
        tree.push('\0');
        tree.push_str(segment);
    }
    tree
}

/// Smallest key greater than every key starting with `prefix`.
pub(crate) fn prefix_successor(prefix: &[u8]) -> Bound<Vec<u8>> {
    let mut next = prefix.to_vec();
    while let Some(last) = next.pop() {
        if last < u8::MAX {
            next.push(last + 1);
            return Bound::Excluded(next);
        }
    }
    Bound::Unbounded
}

/// Index maintenance for one operator's primary tree.
pub(crate) struct IndexManager<'a> {
    engine: &'a dyn KvEngine,
    operator: &'a str,
    definitions: &'a [IndexDefinition],
}

impl<'a> IndexManager<'a> {
    pub(crate) fn new(
        engine: &'a dyn KvEngine,
        operator: &'a str,
        definitions: &'a [IndexDefinition],
    ) -> Self {
        Self {
            engine,
            operator,
            definitions,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Entries to write for `doc` before its primary record lands.
    pub(crate) fn insert_ops(&self, primary_key: &[u8], doc: &Value) -> Vec<BatchOp> {
        self.definitions
            .iter()
            .filter_map(|def| {
                def.entry_key(doc, primary_key).map(|key| BatchOp::Put {
                    tree: index_tree(self.operator, &def.path),
                    key,
                    value: Vec::new(),
                })
            })
            .collect()
    }

    /// Entries of `old` to drop once `new` (if any) has replaced it.
    ///
    /// Entries `new` still needs are kept.
    pub(crate) fn stale_ops(
        &self,
        primary_key: &[u8],
        old: &Value,
        new: Option<&Value>,
    ) -> Vec<BatchOp> {
        self.definitions
            .iter()
            .filter_map(|def| {
                let old_key = def.entry_key(old, primary_key)?;
                let keep = new.and_then(|doc| def.entry_key(doc, primary_key));
                (keep.as_ref() != Some(&old_key)).then(|| BatchOp::Remove {
                    tree: index_tree(self.operator, &def.path),
                    key: old_key,
                })
            })
            .collect()
    }

    /// Fills a new index from every document in the primary tree.
    ///
    /// Documents that lack the field or hold a value that does not fit the
    /// column type are skipped. Returns the number of entries written.
    pub(crate) fn build(&self, def: &IndexDefinition) -> CoreResult<usize> {
        let tree = index_tree(self.operator, &def.path);
        self.engine.create_tree(&tree).for_operator(self.operator)?;

        let mut written = 0;
        let mut from: Option<Vec<u8>> = None;
        loop {
            let bound = match &from {
                Some(key) => Bound::Excluded(key.as_slice()),
                None => Bound::Unbounded,
            };
            let Some((key, value)) = self
                .engine
                .seek(self.operator, bound, false)
                .for_operator(self.operator)?
            else {
                break;
            };
            let doc = crate::operator::decode_document(self.operator, &value)?;
            if let Some(entry) = def.entry_key(&doc, &key) {
                self.engine.put(&tree, &entry, &[]).for_operator(self.operator)?;
                written += 1;
            }
            from = Some(key);
        }
        Ok(written)
    }

    /// Creates empty trees for every definition.
    pub(crate) fn create_trees(&self) -> CoreResult<()> {
        for def in self.definitions {
            self.engine
                .create_tree(&index_tree(self.operator, &def.path))
                .for_operator(self.operator)?;
        }
        Ok(())
    }

    /// Empties every index tree.
    pub(crate) fn clear(&self) -> CoreResult<()> {
        for def in self.definitions {
            self.engine
                .clear(&index_tree(self.operator, &def.path))
                .for_operator(self.operator)?;
        }
        Ok(())
    }

    /// Drops every index tree.
    pub(crate) fn drop_trees(&self) -> CoreResult<()> {
        for def in self.definitions {
            self.engine
                .drop_tree(&index_tree(self.operator, &def.path))
                .for_operator(self.operator)?;
        }
        Ok(())
    }

    /// Moves every index tree to the trees of operator `to`.
    pub(crate) fn rename_trees(&self, to: &str) -> CoreResult<()> {
        for def in self.definitions {
            self.engine
                .rename_tree(
                    &index_tree(self.operator, &def.path),
                    &index_tree(to, &def.path),
                )
                .for_operator(self.operator)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_codec::to_canonical_cbor;
    use strata_storage::OrderedEngine;

    fn city() -> IndexDefinition {
        IndexDefinition::parse("str", &["address.city"]).unwrap()
    }

    #[test]
    fn dotted_and_segmented_paths_match() {
        assert_eq!(
            IndexDefinition::parse("string", &["address", "city"]).unwrap(),
            city()
        );
        assert_eq!(city().column_name(), "address.city");
    }

    #[test]
    fn only_scalar_types_are_indexable() {
        for alias in ["date", "time", "timestamp", "blob"] {
            assert!(matches!(
                IndexDefinition::parse(alias, &["x"]),
                Err(CoreError::TypeMismatch { .. })
            ));
        }
        assert!(matches!(
            IndexDefinition::parse("int", &[]),
            Err(CoreError::Configuration { .. })
        ));
    }

    #[test]
    fn extract_skips_missing_and_uncoercible_fields() {
        let def = IndexDefinition::parse("int", &["age"]).unwrap();
        assert_eq!(
            def.extract(&Value::document([("age", 41)])),
            Some(KeyValue::Int32(41))
        );
        assert_eq!(def.extract(&Value::document([("name", "ann")])), None);
        assert_eq!(def.extract(&Value::document([("age", "old")])), None);
        assert_eq!(def.extract(&Value::document([("age", Value::Null)])), None);
    }

    #[test]
    fn tree_names_are_scoped_to_the_operator() {
        assert_eq!(
            index_tree("users", &["address".into(), "city".into()]),
            "users\0idx\0address\0city"
        );
    }

    #[test]
    fn successor_of_prefix() {
        assert_eq!(prefix_successor(&[1, 2]), Bound::Excluded(vec![1, 3]));
        assert_eq!(prefix_successor(&[1, 0xFF]), Bound::Excluded(vec![2]));
        assert_eq!(prefix_successor(&[0xFF, 0xFF]), Bound::Unbounded);
    }

    #[test]
    fn stale_entries_are_only_the_changed_ones() {
        let engine = OrderedEngine::in_memory();
        let defs = vec![city(), IndexDefinition::parse("int", &["age"]).unwrap()];
        let manager = IndexManager::new(&engine, "users", &defs);

        let old = Value::document([
            ("age", Value::from(30)),
            ("address", Value::document([("city", "Oslo")])),
        ]);
        let new = Value::document([
            ("age", Value::from(30)),
            ("address", Value::document([("city", "Lima")])),
        ]);
        let ops = manager.stale_ops(b"k", &old, Some(&new));
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].tree(), "users\0idx\0address\0city");

        assert_eq!(manager.stale_ops(b"k", &old, None).len(), 2);
        assert_eq!(manager.insert_ops(b"k", &new).len(), 2);
    }

    #[test]
    fn build_indexes_existing_documents() {
        let engine = OrderedEngine::in_memory();
        engine.create_tree("users").unwrap();
        for (key, age) in [
            (b"a", Value::from(3)),
            (b"b", Value::from("x")),
            (b"c", Value::from(1)),
        ] {
            let doc = to_canonical_cbor(&Value::document([("age", age)])).unwrap();
            engine.put("users", key, &doc).unwrap();
        }

        let defs = vec![IndexDefinition::parse("int", &["age"]).unwrap()];
        let manager = IndexManager::new(&engine, "users", &defs);
        assert_eq!(manager.build(&defs[0]).unwrap(), 2);

        let tree = index_tree("users", defs[0].path());
        let (first, _) = engine.seek(&tree, Bound::Unbounded, false).unwrap().unwrap();
        assert!(first.ends_with(b"c"));
    }
}
