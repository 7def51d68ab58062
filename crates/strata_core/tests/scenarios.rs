//! End-to-end scenarios across the four operator kinds.

use strata_core::prelude::*;
use strata_testkit::{collect_rows, init_tracing, TestManager};

#[test]
fn object_put_get_remove() {
    init_tracing();
    let manager = TestManager::memory();
    assert!(manager.create_object("users", KeyType::String).unwrap());
    let users = manager.get("users").unwrap().into_object().unwrap();

    let ann = Value::document([("name", "Ann")]);
    assert_eq!(users.put(&[Value::from("u1")], ann.clone()).unwrap(), None);
    assert_eq!(users.get(&[Value::from("u1")]).unwrap(), Some(ann.clone()));

    assert_eq!(users.remove(&[Value::from("u1")]).unwrap(), Some(ann));
    assert_eq!(users.get(&[Value::from("u1")]).unwrap(), None);
    assert!(users.is_empty().unwrap());
}

#[test]
fn lat_lon_distance_range() {
    init_tracing();
    let manager = TestManager::memory();
    assert!(manager.create_lat_lon("places", None).unwrap());
    let places = manager.get("places").unwrap().into_lat_lon().unwrap();

    let tokyo = Value::document([("name", "Tokyo")]);
    let id = places
        .put(&[Value::from(35.68), Value::from(139.76)], tokyo.clone())
        .unwrap()
        .expect("generated secondary key");
    places
        .put(
            &[Value::from(34.69), Value::from(135.50)],
            Value::document([("name", "Osaka")]),
        )
        .unwrap();

    let near = collect_rows(
        places
            .range(false, &[Value::from(35.68), Value::from(139.76), Value::from(5_000)])
            .unwrap(),
    );
    assert_eq!(near.len(), 1);
    assert_eq!(near[0].1, tokyo);
    assert_eq!(near[0].0[2], id);

    let wide = places
        .range(false, &[Value::from(35.68), Value::from(139.76), Value::from(500_000)])
        .unwrap()
        .count();
    assert_eq!(wide, 2);
}

#[test]
fn queue_is_fifo() {
    init_tracing();
    let manager = TestManager::memory();
    assert!(manager.create_queue("jobs").unwrap());
    let jobs = manager.get("jobs").unwrap().into_queue().unwrap();

    assert!(jobs.offer(Value::document([("task", 1)])).unwrap());
    assert!(jobs.offer(Value::document([("task", 2)])).unwrap());
    assert_eq!(jobs.pop().unwrap(), Some(Value::document([("task", 1)])));
    assert_eq!(jobs.pop().unwrap(), Some(Value::document([("task", 2)])));
    assert_eq!(jobs.pop().unwrap(), None);
}

#[test]
fn sequence_generates_ordered_ids() {
    init_tracing();
    let manager = TestManager::memory();
    assert!(manager.create_sequence("events").unwrap());
    let events = manager.get("events").unwrap().into_sequence().unwrap();

    let login = Value::document([("type", "login")]);
    let first = events.put(&[], login.clone()).unwrap().expect("generated id");
    let second = events
        .put(&[], Value::document([("type", "logout")]))
        .unwrap()
        .expect("generated id");
    assert_eq!(events.get(&[first.clone()]).unwrap(), Some(login));

    let keys: Vec<_> = collect_rows(events.cursor(false, &[]).unwrap())
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    assert_eq!(keys, vec![vec![first.clone()], vec![second.clone()]]);

    let newest_first: Vec<_> = collect_rows(events.cursor(true, &[]).unwrap())
        .into_iter()
        .map(|(_, doc)| doc.get("type").cloned())
        .collect();
    assert_eq!(
        newest_first,
        vec![Some(Value::from("logout")), Some(Value::from("login"))]
    );

    let id = SequenceId::from_value(&first).unwrap();
    assert_eq!(id.machine_id(), 0);
    assert!(SequenceId::from_value(&second).unwrap() > id);
}

#[test]
fn backup_delete_restore() {
    init_tracing();
    let manager = TestManager::memory();
    manager.create_object("users", KeyType::String).unwrap();
    let users = manager.get("users").unwrap().into_object().unwrap();
    users
        .put(&[Value::from("u1")], Value::document([("name", "Ann")]))
        .unwrap();

    let mut buffer = Vec::new();
    manager.backup("users", &mut buffer).unwrap();
    assert!(manager.delete("users").unwrap());
    assert!(!manager.contains("users").unwrap());

    manager.restore(&mut buffer.as_slice()).unwrap();
    assert!(manager.names().unwrap().contains(&"users".to_string()));
    let users = manager.get("users").unwrap().into_object().unwrap();
    assert_eq!(
        users.get(&[Value::from("u1")]).unwrap(),
        Some(Value::document([("name", "Ann")]))
    );
}

#[test]
fn range_and_cursor_on_typed_keys() {
    let manager = TestManager::memory();
    manager.create_object("scores", KeyType::Int32).unwrap();
    let scores = manager.get("scores").unwrap().into_object().unwrap();
    for n in [-20, -3, 0, 7, 42] {
        scores
            .put(&[Value::from(n)], Value::document([("n", n)]))
            .unwrap();
    }

    let bounds = [Value::from(10), Value::from(-5)];
    let between: Vec<_> = collect_rows(scores.range(false, &bounds).unwrap())
        .into_iter()
        .map(|(key, _)| key[0].clone())
        .collect();
    assert_eq!(between, vec![Value::from(-3), Value::from(0), Value::from(7)]);

    let from_zero_down: Vec<_> = collect_rows(scores.cursor(true, &[Value::from(0)]).unwrap())
        .into_iter()
        .map(|(key, _)| key[0].clone())
        .collect();
    assert_eq!(
        from_zero_down,
        vec![Value::from(0), Value::from(-3), Value::from(-20)]
    );

    assert!(matches!(
        scores.get(&[Value::from("seven")]),
        Err(CoreError::TypeMismatch { .. })
    ));
    assert!(matches!(
        scores.get(&[Value::from(1), Value::from(2)]),
        Err(CoreError::Configuration { .. })
    ));
}

#[test]
fn write_batch_commit_and_rollback() {
    let manager = TestManager::memory();
    manager.create_object("users", KeyType::String).unwrap();
    let shared = manager.get("users").unwrap().into_object().unwrap();
    let batch = manager.get_write_batch("users").unwrap().into_object().unwrap();
    assert!(batch.is_write_batch());

    batch
        .put(&[Value::from("a")], Value::document([("n", 1)]))
        .unwrap();
    batch
        .put(&[Value::from("b")], Value::document([("n", 2)]))
        .unwrap();
    assert!(shared.is_empty().unwrap());

    batch.commit().unwrap();
    assert_eq!(shared.len().unwrap(), 2);

    batch.remove(&[Value::from("a")]).unwrap();
    batch.rollback().unwrap();
    assert!(shared.contains(&[Value::from("a")]).unwrap());

    assert!(matches!(shared.commit(), Err(CoreError::Configuration { .. })));
    batch.close().unwrap();
    assert!(matches!(batch.commit(), Err(CoreError::AlreadyClosed { .. })));
    assert!(shared.is_available());
}

#[test]
fn failed_commit_keeps_the_batch() {
    let manager = TestManager::memory();
    manager.create_object("users", KeyType::String).unwrap();
    let shared = manager.get("users").unwrap().into_object().unwrap();
    let batch = manager.get_write_batch("users").unwrap().into_object().unwrap();
    batch
        .put(&[Value::from("a")], Value::document([("n", 1)]))
        .unwrap();
    let staged = batch.pending();
    assert!(staged > 0);

    shared.close().unwrap();
    assert!(matches!(batch.commit(), Err(CoreError::AlreadyClosed { .. })));
    assert_eq!(batch.pending(), staged);

    batch.rollback().unwrap();
    assert_eq!(batch.pending(), 0);
}

#[test]
fn cursor_steps_fail_after_close() {
    let manager = TestManager::memory();
    manager.create_object("users", KeyType::String).unwrap();
    let users = manager.get("users").unwrap().into_object().unwrap();
    for key in ["a", "b", "c"] {
        users
            .put(&[Value::from(key)], Value::document([("k", key)]))
            .unwrap();
    }

    let mut cursor = users.cursor(false, &[]).unwrap();
    assert!(cursor.has_next().unwrap());
    let (key, _) = cursor.next_entry().unwrap().expect("first row");
    assert_eq!(key, vec![Value::from("a")]);
    assert_eq!(cursor.key(), Some(&vec![Value::from("a")]));

    users.close().unwrap();
    assert!(matches!(cursor.next(), Some(Err(CoreError::AlreadyClosed { .. }))));
    assert!(cursor.next().is_none());
}
