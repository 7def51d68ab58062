//! Benchmark utilities.

use rand::Rng;
use strata_codec::{KeyType, Value};
use strata_core::{ManagerConfig, ObjectOperator, OperatorManager, SearchOperator};

/// Generate a document with `fields` random integer fields.
pub fn random_document(fields: usize) -> Value {
    let mut rng = rand::thread_rng();
    Value::document((0..fields).map(|i| (format!("f{i}"), Value::from(rng.gen::<i64>()))))
}

/// Generate `count` random coordinates.
pub fn random_points(count: usize) -> Vec<(f64, f64)> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| (rng.gen_range(-89.0..89.0), rng.gen_range(-179.0..179.0)))
        .collect()
}

/// Generate `count` random values for `key_type`.
pub fn random_keys(key_type: KeyType, count: usize) -> Vec<Value> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| match key_type {
            KeyType::String => Value::from(format!("key-{:016x}", rng.gen::<u64>())),
            KeyType::Int32 => Value::from(rng.gen::<i32>()),
            KeyType::Float32 => Value::from(rng.gen_range(-1e6f32..1e6)),
            KeyType::Float64 => Value::from(rng.gen_range(-1e12f64..1e12)),
            KeyType::Date => Value::from(format!(
                "{:04}-{:02}-{:02}",
                rng.gen_range(1970..2100),
                rng.gen_range(1..=12),
                rng.gen_range(1..=28)
            )),
            KeyType::Time => Value::from(format!(
                "{:02}:{:02}:{:02}",
                rng.gen_range(0..24),
                rng.gen_range(0..60),
                rng.gen_range(0..60)
            )),
            KeyType::Int64 | KeyType::Timestamp => Value::from(rng.gen_range(0..i64::MAX)),
        })
        .collect()
}

/// Opens an in-memory manager with an object operator `bench` holding
/// `count` documents under `long` keys `0..count`.
pub fn populated_object(count: usize) -> (OperatorManager, ObjectOperator) {
    let manager =
        OperatorManager::open(ManagerConfig::default()).expect("Failed to open manager");
    manager
        .create_object("bench", KeyType::Int64)
        .expect("Failed to create operator");
    let op = manager
        .get("bench")
        .and_then(|handle| handle.into_object())
        .expect("Failed to open operator");
    for n in 0..count {
        op.put(&[Value::from(n as i64)], random_document(8))
            .expect("Failed to insert");
    }
    (manager, op)
}
