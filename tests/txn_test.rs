mod test_utils;

use oak_db::ErrorCode;

use crate::test_utils::{insert_row, key, key_present, new_env, new_env_dir, new_uint32_db, setup};

#[test]
fn test_write_write_conflict() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);

    // step 1: T1 buffers an insert on key 7
    let txn_1 = env.txn_begin(None, 0).unwrap();
    db.insert(Some(&txn_1), &key(7), b"x", 0).unwrap();

    // step 2: T2 touching the same key is a conflict
    let txn_2 = env.txn_begin(None, 0).unwrap();
    assert_eq!(
        db.insert(Some(&txn_2), &key(7), b"y", 0).unwrap_err().code(),
        ErrorCode::TxnConflict
    );

    // step 3: after T1 aborts, T2's retry succeeds
    txn_1.abort().unwrap();
    db.insert(Some(&txn_2), &key(7), b"y", 0).unwrap();
    txn_2.commit().unwrap();

    assert_eq!(db.find(None, &key(7)).unwrap(), b"y");
}

#[test]
fn test_abort_leaves_database_unchanged() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);

    insert_row(&db, None, 1, b"committed");

    let txn = env.txn_begin(None, 0).unwrap();
    db.insert(Some(&txn), &key(2), b"doomed", 0).unwrap();
    db.insert(Some(&txn), &key(3), b"doomed", 0).unwrap();

    // the transaction sees its own writes
    assert_eq!(db.find(Some(&txn), &key(2)).unwrap(), b"doomed");

    txn.abort().unwrap();

    assert!(key_present(&db, None, 1));
    assert!(!key_present(&db, None, 2));
    assert!(!key_present(&db, None, 3));
    assert_eq!(db.count(true).unwrap(), 1);
}

#[test]
fn test_commit_visibility() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);

    let txn = env.txn_begin(None, 0).unwrap();
    db.insert(Some(&txn), &key(9), b"pending", 0).unwrap();

    // a buffered write of a live transaction conflicts with readers
    assert_eq!(
        db.find(None, &key(9)).unwrap_err().code(),
        ErrorCode::TxnConflict
    );

    txn.commit().unwrap();

    // committed writes are visible to every later access
    assert_eq!(db.find(None, &key(9)).unwrap(), b"pending");
}

#[test]
fn test_duplicate_key_surfaces_at_issue_time() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);

    insert_row(&db, None, 5, b"there");

    let txn = env.txn_begin(None, 0).unwrap();
    assert_eq!(
        db.insert(Some(&txn), &key(5), b"again", 0).unwrap_err().code(),
        ErrorCode::DuplicateKey
    );
    txn.abort().unwrap();
}

#[test]
fn test_erase_of_missing_key_fails_at_issue_time() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);

    let txn = env.txn_begin(None, 0).unwrap();
    assert_eq!(
        db.erase(Some(&txn), &key(404)).unwrap_err().code(),
        ErrorCode::KeyNotFound
    );
    txn.abort().unwrap();
}

#[test]
fn test_insert_then_erase_in_one_txn() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);

    let txn = env.txn_begin(None, 0).unwrap();
    db.insert(Some(&txn), &key(1), b"fleeting", 0).unwrap();
    db.erase(Some(&txn), &key(1)).unwrap();

    // operations on one key take effect in issue order
    assert_eq!(
        db.find(Some(&txn), &key(1)).unwrap_err().code(),
        ErrorCode::KeyNotFound
    );

    txn.commit().unwrap();
    assert!(!key_present(&db, None, 1));
    assert_eq!(db.count(true).unwrap(), 0);
}

#[test]
fn test_named_transactions() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);

    let txn = env.txn_begin(Some("nightly-batch"), 0).unwrap();
    db.insert(Some(&txn), &key(1), b"one", 0).unwrap();
    txn.commit().unwrap();

    assert_eq!(db.find(None, &key(1)).unwrap(), b"one");
}

#[test]
fn test_many_transactions_rotate_the_journal() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);

    // more transactions than the journal switch threshold
    for k in 0..100u32 {
        let txn = env.txn_begin(None, 0).unwrap();
        db.insert(Some(&txn), &key(k), b"r", 0).unwrap();
        txn.commit().unwrap();
    }

    for k in 0..100u32 {
        assert!(key_present(&db, None, k));
    }
    db.check_integrity().unwrap();
}
