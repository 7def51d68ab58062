//! proptest strategies for operator names, ids, coordinates, documents and
//! typed keys.

use proptest::prelude::*;
use strata_codec::{KeyType, Value};
use strata_core::SequenceId;

/// Strategy for generating valid operator names.
pub fn operator_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,31}").expect("Invalid regex")
}

/// Strategy for generating sequence ids with any field values.
pub fn sequence_id_strategy() -> impl Strategy<Value = SequenceId> {
    (0u64..1 << 48, any::<u16>(), 0u16..=strata_core::MAX_MACHINE_ID)
        .prop_map(|(millis, counter, machine)| SequenceId::new(millis, counter, machine))
}

/// Strategy for latitude/longitude pairs inside the valid range.
pub fn lat_lon_strategy() -> impl Strategy<Value = (f64, f64)> {
    (-90.0f64..=90.0, -180.0f64..=180.0)
}

/// Strategy for scalar values: null, bool, integer, float or text.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        (-1e12f64..1e12).prop_map(Value::from),
        "[a-z0-9 ]{0,16}".prop_map(Value::from),
    ]
}

/// Strategy for documents: maps with text keys, nested up to two levels.
pub fn document_strategy() -> impl Strategy<Value = Value> {
    let leaf = scalar_strategy();
    let nested = leaf.prop_recursive(2, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::document),
        ]
    });
    // Field names must be unique: the decoder rejects repeated map keys.
    prop::collection::btree_map("[a-z]{1,8}", nested, 0..6).prop_map(Value::document)
}

/// Strategy for a key type with a value of that type, in the dynamic
/// form keys arrive in.
pub fn typed_key_strategy() -> impl Strategy<Value = (KeyType, Value)> {
    prop_oneof![
        "[ -~]{0,24}".prop_map(|s| (KeyType::String, Value::from(s))),
        any::<i32>().prop_map(|n| (KeyType::Int32, Value::from(n))),
        any::<i64>().prop_map(|n| (KeyType::Int64, Value::from(n))),
        (-1e30f32..1e30).prop_map(|f| (KeyType::Float32, Value::from(f))),
        (-1e300f64..1e300).prop_map(|f| (KeyType::Float64, Value::from(f))),
        (1970u16..2100, 1u8..=12, 1u8..=28).prop_map(|(y, m, d)| {
            (KeyType::Date, Value::from(format!("{y:04}-{m:02}-{d:02}")))
        }),
        (0u8..24, 0u8..60, 0u8..60).prop_map(|(h, m, s)| {
            (KeyType::Time, Value::from(format!("{h:02}:{m:02}:{s:02}")))
        }),
        (0i64..4_102_444_800_000).prop_map(|ms| (KeyType::Timestamp, Value::from(ms))),
    ]
}

/// Strategy for a list of distinct string keys.
pub fn distinct_keys_strategy(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("[a-z0-9]{1,12}", 0..max)
        .prop_map(|keys| keys.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_codec::{from_cbor, to_canonical_cbor};

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn documents_are_maps(doc in document_strategy()) {
            prop_assert!(doc.is_map());
            let bytes = to_canonical_cbor(&doc).unwrap();
            prop_assert_eq!(from_cbor(&bytes).unwrap(), doc);
        }

        #[test]
        fn typed_keys_coerce(pair in typed_key_strategy()) {
            let (key_type, value) = pair;
            prop_assert!(key_type.coerce(&value).is_ok());
        }

        #[test]
        fn names_are_valid(name in operator_name_strategy()) {
            prop_assert!(!name.is_empty());
        }
    }
}
