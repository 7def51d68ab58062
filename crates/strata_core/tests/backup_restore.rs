//! Backup streams: round trips for every kind, corrupt input, and the
//! interaction with concurrent write batch commits.

use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;
use strata_core::prelude::*;
use strata_core::{BackupConfig, BackupManager};
use strata_testkit::{collect_rows, init_tracing, users_fixture, TestManager};

fn scan(op: &dyn SearchOperator) -> BTreeSet<String> {
    collect_rows(op.cursor(false, &[]).unwrap())
        .into_iter()
        .map(|(key, doc)| format!("{key:?}={doc:?}"))
        .collect()
}

fn round_trip(manager: &OperatorManager, name: &str) -> (u64, u64) {
    let mut stream = Vec::new();
    let written = manager.backup(name, &mut stream).unwrap();
    assert!(manager.delete(name).unwrap());
    let restored = manager.restore(&mut stream.as_slice()).unwrap();
    assert_eq!(restored.name, name);
    assert_eq!(restored.kind, written.kind);
    assert_eq!(restored.block_count, written.block_count);
    (written.record_count, restored.record_count)
}

#[test]
fn object_scan_is_set_equal_after_restore() {
    init_tracing();
    let manager = TestManager::memory();
    let users = users_fixture(&manager, "users", 300);
    users.create_index("string", &["address.city"]).unwrap();
    let before = scan(&users);

    let (written, restored) = round_trip(&manager, "users");
    assert_eq!((written, restored), (300, 300));

    let users = manager.get("users").unwrap().into_object().unwrap();
    assert_eq!(scan(&users), before);
    assert!(users.is_index(&["address", "city"]).unwrap());
    assert_eq!(
        users
            .index(false, Some(&Value::from("Lima")), &["address.city"])
            .unwrap()
            .count(),
        100
    );
}

#[test]
fn lat_lon_and_sequence_keys_survive() {
    init_tracing();
    let manager = TestManager::memory();
    manager.create_lat_lon("places", None).unwrap();
    manager.create_sequence("events").unwrap();
    let places = manager.get("places").unwrap().into_lat_lon().unwrap();
    let events = manager.get("events").unwrap().into_sequence().unwrap();
    for n in 0..20i32 {
        let (lat, lon) = (f64::from(n) - 10.0, f64::from(n) * 3.0);
        places
            .put(&[Value::from(lat), Value::from(lon)], Value::document([("n", n)]))
            .unwrap();
        events.put(&[], Value::document([("n", n)])).unwrap();
    }
    let places_before = scan(&places);
    let events_before = scan(&events);

    assert_eq!(round_trip(&manager, "places"), (20, 20));
    assert_eq!(round_trip(&manager, "events"), (20, 20));

    let places = manager.get("places").unwrap().into_lat_lon().unwrap();
    let events = manager.get("events").unwrap().into_sequence().unwrap();
    assert_eq!(scan(&places), places_before);
    assert_eq!(scan(&events), events_before);
}

#[test]
fn queue_order_survives() {
    let manager = TestManager::memory();
    manager.create_queue("jobs").unwrap();
    let jobs = manager.get("jobs").unwrap().into_queue().unwrap();
    for task in 0..5 {
        jobs.offer(Value::document([("task", task)])).unwrap();
    }
    assert_eq!(jobs.pop().unwrap(), Some(Value::document([("task", 0)])));

    assert_eq!(round_trip(&manager, "jobs"), (4, 4));
    let jobs = manager.get("jobs").unwrap().into_queue().unwrap();
    for task in 1..5 {
        assert_eq!(jobs.pop().unwrap(), Some(Value::document([("task", task)])));
    }
    assert_eq!(jobs.pop().unwrap(), None);
}

#[test]
fn restore_replaces_existing_operator() {
    let manager = TestManager::memory();
    users_fixture(&manager, "users", 4);
    let mut stream = Vec::new();
    manager.backup("users", &mut stream).unwrap();

    let users = manager.get("users").unwrap().into_object().unwrap();
    users
        .put(&[Value::from("extra")], Value::document([("n", 1)]))
        .unwrap();

    let result = manager.restore(&mut stream.as_slice()).unwrap();
    assert_eq!(result.record_count, 4);
    assert!(!users.is_available());
    let users = manager.get("users").unwrap().into_object().unwrap();
    assert_eq!(users.len().unwrap(), 4);
    assert!(!users.contains(&[Value::from("extra")]).unwrap());
}

#[test]
fn header_can_be_read_alone() {
    let manager = TestManager::memory();
    let users = users_fixture(&manager, "users", 2);
    users.create_index("long", &["age"]).unwrap();
    let mut stream = Vec::new();
    manager.backup("users", &mut stream).unwrap();

    let descriptor = BackupManager::read_header(&mut stream.as_slice()).unwrap();
    assert_eq!(descriptor.name, "users");
    assert_eq!(descriptor.mode.kind, OperatorKind::Object);
    assert_eq!(descriptor.mode.key_type, Some(KeyType::String));
    assert_eq!(descriptor.indexes[0].column_type(), KeyType::Int64);
    assert_eq!(descriptor.indexes[0].column_name(), "age");
}

#[test]
fn corrupt_block_keeps_earlier_blocks() {
    init_tracing();
    let manager = TestManager::memory();
    users_fixture(&manager, "users", 10);
    let backups = BackupManager::new(BackupConfig::default().block_size(4));
    let mut stream = Vec::new();
    let written = backups.backup(&manager, "users", &mut stream).unwrap();
    assert_eq!(written.block_count, 3);

    // Garble the payload of the second data block.
    let header_len = u32::from_le_bytes(stream[..4].try_into().unwrap()) as usize;
    let first_at = 4 + header_len;
    let first_len = u32::from_le_bytes(stream[first_at..first_at + 4].try_into().unwrap()) as usize;
    let second_at = first_at + 4 + first_len;
    for byte in &mut stream[second_at + 4..second_at + 12] {
        *byte ^= 0x5a;
    }

    let err = backups
        .restore(&manager, &mut stream.as_slice())
        .unwrap_err();
    assert!(matches!(err, CoreError::CorruptData { .. }));
    assert!(err.is_operational());

    let users = manager.get("users").unwrap().into_object().unwrap();
    assert_eq!(users.len().unwrap(), 4);
}

#[test]
fn malformed_streams_are_corrupt() {
    let manager = TestManager::memory();
    let cases: [&[u8]; 4] = [
        &[],
        &[3, 0],
        &[4, 0, 0, 0, 0xff, 0xff],
        &[2, 0, 0, 0, 0x82, 0x01],
    ];
    for case in cases {
        let err = manager.restore(&mut &case[..]).unwrap_err();
        assert!(matches!(err, CoreError::CorruptData { .. }), "{err}");
    }
}

#[test]
fn backup_sees_all_or_none_of_a_committing_batch() {
    init_tracing();
    for _ in 0..20 {
        let manager = Arc::new(OperatorManager::open(ManagerConfig::default()).unwrap());
        users_fixture(&manager, "users", 50);
        let batch = manager.get_write_batch("users").unwrap().into_object().unwrap();
        for n in 0..50 {
            batch
                .put(&[Value::from(format!("b{n}"))], Value::document([("n", n)]))
                .unwrap();
        }

        let barrier = Arc::new(Barrier::new(2));
        let committer = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                batch.commit().unwrap();
            })
        };
        barrier.wait();
        let mut stream = Vec::new();
        let result = manager.backup("users", &mut stream).unwrap();
        committer.join().unwrap();

        assert!(
            result.record_count == 50 || result.record_count == 100,
            "backup saw {} records",
            result.record_count
        );
        assert_eq!(
            manager.get("users").unwrap().as_operator().len().unwrap(),
            100
        );
    }
}

#[test]
fn closed_manager_rejects_backup() {
    let manager = TestManager::memory();
    users_fixture(&manager, "users", 1);
    manager.close().unwrap();
    let mut stream = Vec::new();
    assert!(matches!(
        manager.backup("users", &mut stream),
        Err(CoreError::AlreadyClosed { .. })
    ));
}

#[test]
fn reserved_header_names_leave_the_catalog_alone() {
    let manager = TestManager::file();
    users_fixture(&manager, "users", 2);

    let header = Value::Array(vec![
        Value::from("\0catalog"),
        Value::document([("@operator", "queue")]),
    ]);
    let header = strata_codec::to_canonical_cbor(&header).unwrap();
    let mut stream = (header.len() as u32).to_le_bytes().to_vec();
    stream.extend_from_slice(&header);
    stream.extend_from_slice(&[0, 0, 0, 0]);
    assert!(matches!(
        manager.restore(&mut stream.as_slice()),
        Err(CoreError::CorruptData { .. })
    ));

    let manager = manager.reopen();
    assert_eq!(manager.names().unwrap(), vec!["users"]);
    assert_eq!(manager.get("users").unwrap().as_operator().len().unwrap(), 2);
}

#[test]
fn restoring_the_last_id_exhausts_instead_of_wrapping() {
    let manager = TestManager::memory();
    manager.create_sequence("events").unwrap();
    let events = manager.get("events").unwrap().into_sequence().unwrap();
    let last = SequenceId::new(strata_core::MAX_ID_MILLIS, u16::MAX, 0);
    events
        .put(&[last.to_value()], Value::document([("n", 1)]))
        .unwrap();
    let mut stream = Vec::new();
    manager.backup("events", &mut stream).unwrap();

    let fresh = TestManager::memory();
    fresh.restore(&mut stream.as_slice()).unwrap();
    let events = fresh.get("events").unwrap().into_sequence().unwrap();
    assert!(matches!(
        events.put(&[], Value::document([("n", 2)])),
        Err(CoreError::IdsExhausted { .. })
    ));
    assert_eq!(events.len().unwrap(), 1);

    let beyond = SequenceId::from_bytes([0xff; strata_core::SEQUENCE_ID_LEN]);
    assert!(matches!(
        events.put(&[beyond.to_value()], Value::document([("n", 3)])),
        Err(CoreError::TypeMismatch { .. })
    ));
}
