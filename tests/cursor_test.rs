mod test_utils;

use oak_db::{config, ErrorCode};

use crate::test_utils::{insert_row, key, new_dup_db, new_env, new_env_dir, new_uint32_db, setup};

#[test]
fn test_duplicate_ordering() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_dup_db(&env, 1);

    // step 1: plain insert, then position-controlled duplicates
    db.insert(None, &key(10), b"A", 0).unwrap();
    db.insert(None, &key(10), b"B", config::DUPLICATE_INSERT_FIRST)
        .unwrap();
    db.insert(None, &key(10), b"C", config::DUPLICATE_INSERT_LAST)
        .unwrap();

    // step 2: the cursor visits the duplicates in duplicate order
    let mut cursor = db.cursor().unwrap();
    let first = cursor.find(&key(10)).unwrap();
    assert_eq!(first, b"B");

    let (_, second) = cursor.move_next().unwrap().unwrap();
    assert_eq!(second, b"A");
    let (_, third) = cursor.move_next().unwrap().unwrap();
    assert_eq!(third, b"C");
    assert!(cursor.move_next().unwrap().is_none());
}

#[test]
fn test_range_scan() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);

    // keys 0, 2, 4, ..., 998
    for k in (0..1000u32).step_by(2) {
        insert_row(&db, None, k, b"r");
    }

    let mut cursor = db.cursor().unwrap();
    let start = cursor.lower_bound(&key(301)).unwrap();
    assert_eq!(start, key(302));

    let mut visited = vec![start];
    while let Some((k, _)) = cursor.move_next().unwrap() {
        visited.push(k);
    }

    assert_eq!(visited.len(), 349);
    let mut expected = 302u32;
    for k in &visited {
        assert_eq!(k, &key(expected));
        expected += 2;
    }
}

#[test]
fn test_full_walk_is_ordered() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);

    for k in (0..600u32).rev() {
        insert_row(&db, None, k, b"r");
    }

    let mut cursor = db.cursor().unwrap();
    let mut count = 0u32;
    while let Some((k, _)) = cursor.move_next().unwrap() {
        assert_eq!(k, key(count));
        count += 1;
    }
    assert_eq!(count, 600);
}

#[test]
fn test_cursor_relative_duplicate_inserts() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_dup_db(&env, 1);

    db.insert(None, &key(5), b"middle", 0).unwrap();

    let mut cursor = db.cursor().unwrap();
    cursor.find(&key(5)).unwrap();
    cursor.insert_before(b"head").unwrap();
    cursor.insert_after(b"tail").unwrap();

    // the cursor follows each inserted duplicate, so the final order
    // is head, tail, middle
    let mut walk = db.cursor().unwrap();
    let mut records = vec![walk.find(&key(5)).unwrap()];
    while let Some((_, record)) = walk.move_next().unwrap() {
        records.push(record);
    }
    assert_eq!(records, vec![b"head".to_vec(), b"tail".to_vec(), b"middle".to_vec()]);
}

#[test]
fn test_open_cursor_blocks_erase_db() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);
    insert_row(&db, None, 1, b"x");

    let cursor = db.cursor().unwrap();
    assert_eq!(
        env.erase_db(1).unwrap_err().code(),
        ErrorCode::CursorStillOpen
    );

    drop(cursor);
    env.erase_db(1).unwrap();
    assert!(env.database_names().unwrap().is_empty());
}

#[test]
fn test_cursor_survives_mutation() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);

    for k in 0..100u32 {
        insert_row(&db, None, k, b"r");
    }

    let mut cursor = db.cursor().unwrap();
    cursor.find(&key(50)).unwrap();

    // the current key disappears; the cursor falls through to the
    // next greater one
    db.erase(None, &key(50)).unwrap();
    db.erase(None, &key(51)).unwrap();

    let (k, _) = cursor.move_next().unwrap().unwrap();
    assert_eq!(k, key(52));
}
