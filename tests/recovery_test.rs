mod test_utils;

use oak_db::{
    compress::CompressionKind, journal::Journal, DbConfig, EnvConfig, Environment, ErrorCode,
};

use crate::test_utils::{
    env_path, insert_row, key, key_present, new_env, new_env_dir, new_uint32_db, reopen_env, setup,
};

#[test]
fn test_crash_recovery_of_committed_and_uncommitted_txns() {
    setup();
    let dir = new_env_dir();

    // step 1: T1 commits 1..=1000, T2 leaves 1001..=1500 uncommitted
    {
        let env = new_env(&dir);
        let db = new_uint32_db(&env, 1);

        let txn_1 = env.txn_begin(None, 0).unwrap();
        for k in 1..=1000u32 {
            db.insert(Some(&txn_1), &key(k), b"committed", 0).unwrap();
        }
        txn_1.commit().unwrap();

        let txn_2 = env.txn_begin(None, 0).unwrap();
        for k in 1001..=1500u32 {
            db.insert(Some(&txn_2), &key(k), b"uncommitted", 0).unwrap();
        }

        // crash: no commit, no close
        drop(txn_2);
        drop(db);
        drop(env);
    }

    // step 2: reopening replays the journal
    let env = reopen_env(&dir);
    let db = env.open_db(1, DbConfig::default()).unwrap();

    for k in (1..=1000u32).step_by(13) {
        assert_eq!(db.find(None, &key(k)).unwrap(), b"committed");
    }
    for k in (1001..=1500u32).step_by(13) {
        assert_eq!(
            db.find(None, &key(k)).unwrap_err().code(),
            ErrorCode::KeyNotFound
        );
    }
    assert_eq!(db.count(true).unwrap(), 1000);
    db.check_integrity().unwrap();
}

#[test]
fn test_temporary_operations_survive_a_crash() {
    setup();
    let dir = new_env_dir();

    {
        let env = new_env(&dir);
        let db = new_uint32_db(&env, 1);
        for k in 0..300u32 {
            insert_row(&db, None, k, b"auto");
        }
        db.erase(None, &key(7)).unwrap();
        // crash
    }

    let env = reopen_env(&dir);
    let db = env.open_db(1, DbConfig::default()).unwrap();
    assert_eq!(db.count(true).unwrap(), 299);
    assert!(!key_present(&db, None, 7));
    assert_eq!(db.find(None, &key(8)).unwrap(), b"auto");
}

#[test]
fn test_need_recovery_when_recovery_is_disabled() {
    setup();
    let dir = new_env_dir();

    {
        let env = new_env(&dir);
        let db = new_uint32_db(&env, 1);
        insert_row(&db, None, 1, b"x");
        // crash
    }

    let err = Environment::open(
        env_path(&dir),
        EnvConfig {
            enable_recovery: false,
            ..Default::default()
        },
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NeedRecovery);

    // with recovery enabled the same open succeeds
    let env = reopen_env(&dir);
    let db = env.open_db(1, DbConfig::default()).unwrap();
    assert_eq!(db.find(None, &key(1)).unwrap(), b"x");
}

#[test]
fn test_recovery_is_idempotent() {
    setup();
    let dir = new_env_dir();

    {
        let env = new_env(&dir);
        let db = new_uint32_db(&env, 1);
        for k in 0..200u32 {
            insert_row(&db, None, k, b"r");
        }
        // crash
    }

    // first recovery
    {
        let env = reopen_env(&dir);
        let db = env.open_db(1, DbConfig::default()).unwrap();
        assert_eq!(db.count(true).unwrap(), 200);
        // crash again right after recovery
        drop(db);
        drop(env);
    }

    // recovering a second time reaches the same state
    let env = reopen_env(&dir);
    let db = env.open_db(1, DbConfig::default()).unwrap();
    assert_eq!(db.count(true).unwrap(), 200);
    for k in (0..200u32).step_by(11) {
        assert_eq!(db.find(None, &key(k)).unwrap(), b"r");
    }
    db.check_integrity().unwrap();
}

#[test]
fn test_journal_lsns_are_strictly_increasing() {
    setup();
    let dir = new_env_dir();

    {
        let env = new_env(&dir);
        let db = new_uint32_db(&env, 1);

        for k in 0..50u32 {
            insert_row(&db, None, k, b"x");
        }
        let txn = env.txn_begin(Some("probe"), 0).unwrap();
        db.insert(Some(&txn), &key(100), b"y", 0).unwrap();
        txn.commit().unwrap();
        // crash, leaving the journal behind for inspection
    }

    let mut journal = Journal::open(
        &env_path(&dir),
        32,
        false,
        CompressionKind::None,
        4096,
    )
    .unwrap();
    journal.show_contents().unwrap();

    let entries = journal.read_entries(false).unwrap();
    assert!(entries.len() > 50);

    // lsn-sorted entries must be strictly increasing: no duplicates
    for window in entries.windows(2) {
        assert!(window[0].0.lsn < window[1].0.lsn);
    }
}

#[test]
fn test_clean_close_leaves_no_journal_behind() {
    setup();
    let dir = new_env_dir();

    {
        let env = new_env(&dir);
        let db = new_uint32_db(&env, 1);
        insert_row(&db, None, 1, b"x");
        env.close().unwrap();
    }

    let mut journal = Journal::open(
        &env_path(&dir),
        32,
        false,
        CompressionKind::None,
        4096,
    )
    .unwrap();
    assert!(journal.is_empty().unwrap());
    assert!(journal.read_entries(false).unwrap().is_empty());
}
