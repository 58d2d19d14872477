mod test_utils;

use oak_db::{config, DataType, DbConfig, ErrorCode, RecordNumber};
use rand::prelude::*;

use crate::test_utils::{
    collect_keys, insert_row, key, key_present, new_binary_db, new_dup_db, new_env, new_env_dir,
    new_uint32_db, setup,
};

#[test]
fn test_insert_and_find_across_splits() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);

    // enough rows to force several leaf and internal splits
    for k in 0..2000u32 {
        insert_row(&db, None, k, format!("value-{}", k).as_bytes());
    }

    db.check_integrity().unwrap();
    assert_eq!(db.count(true).unwrap(), 2000);

    for k in (0..2000u32).step_by(97) {
        let record = db.find(None, &key(k)).unwrap();
        assert_eq!(record, format!("value-{}", k).as_bytes());
    }
    assert_eq!(
        db.find(None, &key(5000)).unwrap_err().code(),
        ErrorCode::KeyNotFound
    );
}

#[test]
fn test_random_insert_order_stays_sorted() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);

    let mut values: Vec<u32> = (0..1000).collect();
    values.shuffle(&mut rand::thread_rng());
    for k in &values {
        insert_row(&db, None, *k, b"x");
    }

    db.check_integrity().unwrap();

    let keys = collect_keys(&db);
    assert_eq!(keys.len(), 1000);
    for (index, k) in keys.iter().enumerate() {
        assert_eq!(k, &key(index as u32));
    }
}

#[test]
fn test_erase_to_empty_merges_leaves() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);

    for k in 0..1500u32 {
        insert_row(&db, None, k, b"payload");
    }

    // erase in an order that exercises both merge directions
    for k in 0..750u32 {
        db.erase(None, &key(k)).unwrap();
        db.erase(None, &key(1499 - k)).unwrap();
    }

    db.check_integrity().unwrap();
    assert_eq!(db.count(true).unwrap(), 0);
    assert!(!key_present(&db, None, 0));
    assert!(!key_present(&db, None, 749));

    // the tree keeps working after it ran empty
    insert_row(&db, None, 42, b"back again");
    assert_eq!(db.find(None, &key(42)).unwrap(), b"back again");
}

#[test]
fn test_overwrite_and_duplicate_key_error() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);

    insert_row(&db, None, 1, b"first");
    assert_eq!(
        db.insert(None, &key(1), b"second", 0).unwrap_err().code(),
        ErrorCode::DuplicateKey
    );

    db.insert(None, &key(1), b"second", config::OVERWRITE).unwrap();
    assert_eq!(db.find(None, &key(1)).unwrap(), b"second");
    assert_eq!(db.count(false).unwrap(), 1);
}

#[test]
fn test_duplicate_accounting() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_dup_db(&env, 1);

    insert_row(&db, None, 7, b"a");
    for record in [b"b", b"c", b"d", b"e"].iter() {
        db.insert(None, &key(7), *record, config::DUPLICATE).unwrap();
    }
    assert_eq!(db.record_count(&key(7)).unwrap(), 5);
    assert_eq!(db.count(true).unwrap(), 1);
    assert_eq!(db.count(false).unwrap(), 5);

    db.erase_duplicate(None, &key(7), 1).unwrap();
    db.erase_duplicate(None, &key(7), 0).unwrap();
    assert_eq!(db.record_count(&key(7)).unwrap(), 3);

    db.erase(None, &key(7)).unwrap();
    assert_eq!(
        db.find(None, &key(7)).unwrap_err().code(),
        ErrorCode::KeyNotFound
    );
}

#[test]
fn test_record_number_database() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = env
        .create_db(
            1,
            DbConfig {
                record_number: RecordNumber::U32,
                ..Default::default()
            },
        )
        .unwrap();

    // empty keys get auto-assigned, strictly increasing numbers
    for n in 1..=100u32 {
        db.insert(None, &[], format!("row-{}", n).as_bytes(), 0).unwrap();
    }
    assert_eq!(db.find(None, &key(1)).unwrap(), b"row-1");
    assert_eq!(db.find(None, &key(100)).unwrap(), b"row-100");

    // the counter survives a reopen
    env.close().unwrap();
    let env = crate::test_utils::reopen_env(&dir);
    let db = env.open_db(1, DbConfig::default()).unwrap();
    db.insert(None, &[], b"row-101", 0).unwrap();
    assert_eq!(db.find(None, &key(101)).unwrap(), b"row-101");
}

#[test]
fn test_max_size_keys_force_splits() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_binary_db(&env, 1);

    // near the inline limit: a handful of keys fills a node
    for k in 0..64u32 {
        let mut big_key = vec![b'k'; 500];
        big_key[..4].copy_from_slice(&key(k));
        db.insert(None, &big_key, b"v", 0).unwrap();
    }
    db.check_integrity().unwrap();
    assert_eq!(db.count(true).unwrap(), 64);

    // beyond the inline limit: keys overflow into blobs
    for k in 0..32u32 {
        let mut huge_key = vec![b'K'; 600];
        huge_key[..4].copy_from_slice(&key(k));
        db.insert(None, &huge_key, b"w", 0).unwrap();
    }
    db.check_integrity().unwrap();
    assert_eq!(db.count(true).unwrap(), 96);

    let mut probe = vec![b'K'; 600];
    probe[..4].copy_from_slice(&key(17));
    assert_eq!(db.find(None, &probe).unwrap(), b"w");

    let mut gone = vec![b'K'; 600];
    gone[..4].copy_from_slice(&key(99));
    assert_eq!(
        db.find(None, &gone).unwrap_err().code(),
        ErrorCode::KeyNotFound
    );
}

#[test]
fn test_find_approx() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);

    for k in [10u32, 20, 30].iter() {
        insert_row(&db, None, *k, b"v");
    }

    let (found, _) = db
        .find_approx(None, &key(25), config::FIND_LT_MATCH)
        .unwrap();
    assert_eq!(found, key(20));

    let (found, _) = db
        .find_approx(None, &key(25), config::FIND_GT_MATCH)
        .unwrap();
    assert_eq!(found, key(30));

    // exact matches win over approximation
    let (found, _) = db
        .find_approx(None, &key(20), config::FIND_GT_MATCH)
        .unwrap();
    assert_eq!(found, key(20));

    assert_eq!(
        db.find_approx(None, &key(5), config::FIND_LT_MATCH)
            .unwrap_err()
            .code(),
        ErrorCode::KeyNotFound
    );
    assert_eq!(
        db.find_approx(None, &key(35), config::FIND_GT_MATCH)
            .unwrap_err()
            .code(),
        ErrorCode::KeyNotFound
    );
}

#[test]
fn test_fixed_size_records() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = env
        .create_db(
            1,
            DbConfig {
                key_type: DataType::UInt32,
                record_type: DataType::UInt64,
                ..Default::default()
            },
        )
        .unwrap();

    for k in 0..500u32 {
        db.insert(None, &key(k), &(k as u64 * 3).to_le_bytes(), 0).unwrap();
    }
    let record = db.find(None, &key(123)).unwrap();
    assert_eq!(record, (369u64).to_le_bytes());

    // wrong record width is rejected
    assert_eq!(
        db.insert(None, &key(1000), b"short", 0).unwrap_err().code(),
        ErrorCode::InvalidParameter
    );
}
