// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::*;

fn basic_roundtrip<S: Store>(db: &S) {
    assert_eq!(db.read(0, b"missing").unwrap(), None);
    db.write(0, b"k1", b"v1").unwrap();
    assert_eq!(db.read(0, b"k1").unwrap(), Some(b"v1".to_vec()));
    assert!(db.exists(0, b"k1").unwrap());

    // same key in another column is independent
    assert_eq!(db.read(1, b"k1").unwrap(), None);

    db.delete(0, b"k1").unwrap();
    assert_eq!(db.read(0, b"k1").unwrap(), None);
    // deleting an absent key is fine
    db.delete(0, b"k1").unwrap();
}

fn batch_is_atomic_and_ordered<S: Store>(db: &S) {
    db.commit(vec![
        BatchOp::put(0, b"b".to_vec(), b"2".to_vec()),
        BatchOp::put(0, b"a".to_vec(), b"1".to_vec()),
        BatchOp::put(0, b"ab".to_vec(), b"3".to_vec()),
        BatchOp::put(1, b"aa".to_vec(), b"other".to_vec()),
    ])
    .unwrap();

    let keys: Vec<_> = db
        .iter_prefix(0, b"a")
        .unwrap()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"ab".to_vec()]);

    let all: Vec<_> = db
        .iter_from(0, b"")
        .unwrap()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(all, vec![b"a".to_vec(), b"ab".to_vec(), b"b".to_vec()]);

    db.commit(vec![
        BatchOp::delete(0, b"a".to_vec()),
        BatchOp::delete(0, b"ab".to_vec()),
    ])
    .unwrap();
    assert!(db.iter_prefix(0, b"a").unwrap().is_empty());
}

#[test]
fn memory_db_roundtrip() {
    let db = MemoryDb::new();
    basic_roundtrip(&db);
}

#[test]
fn memory_db_batches() {
    let db = MemoryDb::new();
    batch_is_atomic_and_ordered(&db);
}

#[test]
fn parity_db_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let db = ParityDb::open(&ParityDbConfig::from_path(dir.path(), 2)).unwrap();
    basic_roundtrip(&db);
}

#[test]
fn parity_db_batches() {
    let dir = tempfile::tempdir().unwrap();
    let db = ParityDb::open(&ParityDbConfig::from_path(dir.path(), 2)).unwrap();
    batch_is_atomic_and_ordered(&db);
}

#[test]
fn parity_db_rejects_unknown_column() {
    let dir = tempfile::tempdir().unwrap();
    let db = ParityDb::open(&ParityDbConfig::from_path(dir.path(), 2)).unwrap();
    assert!(matches!(
        db.write(7, b"k", b"v"),
        Err(Error::UnknownColumn(7))
    ));
}
