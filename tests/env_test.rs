mod test_utils;

use std::cmp::Ordering;
use std::io::Write;

use oak_db::{
    register_compare, DataType, DbConfig, EnvConfig, Environment, ErrorCode,
};

use crate::test_utils::{
    collect_keys, env_path, insert_row, key, new_env, new_env_dir, new_env_with_config,
    new_uint32_db, reopen_env, setup,
};


#[test]
fn test_create_insert_reopen() {
    setup();
    let dir = new_env_dir();

    // step 1: create, fill, close
    {
        let env = new_env_with_config(
            &dir,
            EnvConfig {
                page_size: 4096,
                ..Default::default()
            },
        );
        let db = new_uint32_db(&env, 1);
        insert_row(&db, None, 1, b"a");
        insert_row(&db, None, 2, b"bb");
        insert_row(&db, None, 3, b"ccc");
        env.close().unwrap();
    }

    // step 2: reopen and read back
    let env = reopen_env(&dir);
    let db = env.open_db(1, DbConfig::default()).unwrap();
    assert_eq!(db.find(None, &key(2)).unwrap(), b"bb");
    assert_eq!(db.find(None, &key(3)).unwrap(), b"ccc");
}

#[test]
fn test_page_size_comes_from_the_header() {
    setup();
    let dir = new_env_dir();

    {
        let env = new_env_with_config(
            &dir,
            EnvConfig {
                page_size: 16384,
                ..Default::default()
            },
        );
        let db = new_uint32_db(&env, 1);
        for k in 0..500u32 {
            insert_row(&db, None, k, b"value");
        }
        env.close().unwrap();
    }

    // the open config asks for 4096; the header page wins
    let env = Environment::open(
        env_path(&dir),
        EnvConfig {
            page_size: 4096,
            ..Default::default()
        },
    )
    .unwrap();
    let db = env.open_db(1, DbConfig::default()).unwrap();
    assert_eq!(db.count(true).unwrap(), 500);
    assert_eq!(db.find(None, &key(123)).unwrap(), b"value");
}

#[test]
fn test_database_management() {
    setup();
    let dir = new_env_dir();
    let env = new_env_with_config(
        &dir,
        EnvConfig {
            max_databases: 2,
            ..Default::default()
        },
    );

    let _db_1 = new_uint32_db(&env, 1);
    let _db_2 = new_uint32_db(&env, 2);
    assert_eq!(env.database_names().unwrap(), vec![1, 2]);

    // the descriptor table is full
    assert_eq!(
        env.create_db(3, DbConfig::default()).unwrap_err().code(),
        ErrorCode::LimitsReached
    );
    assert_eq!(
        env.create_db(1, DbConfig::default()).unwrap_err().code(),
        ErrorCode::DatabaseAlreadyExists
    );
    assert_eq!(
        env.open_db(9, DbConfig::default()).unwrap_err().code(),
        ErrorCode::DatabaseNotFound
    );

    env.rename_db(2, 5).unwrap();
    let mut names = env.database_names().unwrap();
    names.sort_unstable();
    assert_eq!(names, vec![1, 5]);

    env.erase_db(1).unwrap();
    assert_eq!(env.database_names().unwrap(), vec![5]);

    // the freed slot is reusable
    let _db_3 = new_uint32_db(&env, 7);
    let mut names = env.database_names().unwrap();
    names.sort_unstable();
    assert_eq!(names, vec![5, 7]);
}

#[test]
fn test_in_memory_environment() {
    setup();
    let dir = new_env_dir();
    let env = new_env_with_config(
        &dir,
        EnvConfig {
            in_memory: true,
            ..Default::default()
        },
    );
    let db = new_uint32_db(&env, 1);

    for k in 0..1000u32 {
        insert_row(&db, None, k, b"mem");
    }
    assert_eq!(db.count(true).unwrap(), 1000);

    let txn = env.txn_begin(None, 0).unwrap();
    db.insert(Some(&txn), &key(5000), b"pending", 0).unwrap();
    txn.abort().unwrap();
    assert!(db.find(None, &key(5000)).is_err());

    db.check_integrity().unwrap();
}

fn reverse_binary(lhs: &[u8], rhs: &[u8]) -> Ordering {
    rhs.cmp(lhs)
}

#[test]
fn test_custom_compare() {
    setup();
    let dir = new_env_dir();
    register_compare("reverse-binary", reverse_binary);

    let env = new_env(&dir);
    let db = env
        .create_db(
            1,
            DbConfig {
                key_type: DataType::Custom,
                compare_name: Some("reverse-binary".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    for k in [10u32, 20, 30].iter() {
        db.insert(None, &key(*k), b"v", 0).unwrap();
    }

    // the custom order reverses the keys
    let keys = collect_keys(&db);
    assert_eq!(keys, vec![key(30), key(20), key(10)]);

    // reopening resolves the comparator by its hash
    env.close().unwrap();
    let env = reopen_env(&dir);
    let db = env.open_db(1, DbConfig::default()).unwrap();
    db.insert(None, &key(25), b"v", 0).unwrap();
    let keys = collect_keys(&db);
    assert_eq!(keys, vec![key(30), key(25), key(20), key(10)]);
}

#[test]
fn test_unregistered_compare_is_rejected() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    assert_eq!(
        env.create_db(
            1,
            DbConfig {
                key_type: DataType::Custom,
                compare_name: Some("never-registered".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err()
        .code(),
        ErrorCode::PluginNotFound
    );
}

#[test]
fn test_invalid_header_is_rejected() {
    setup();
    let dir = new_env_dir();
    let path = env_path(&dir);
    {
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&vec![0x5Au8; 8192]).unwrap();
    }

    assert_eq!(
        Environment::open(&path, EnvConfig::default())
            .unwrap_err()
            .code(),
        ErrorCode::InvalidFileHeader
    );
}

#[test]
fn test_bogus_page_size_is_rejected() {
    setup();
    let dir = new_env_dir();
    for page_size in [1000u32, 512, 131072].iter() {
        let err = Environment::create(
            env_path(&dir),
            EnvConfig {
                page_size: *page_size,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParameter);
    }
}

#[test]
fn test_flush_persists_without_close() {
    setup();
    let dir = new_env_dir();
    {
        let env = new_env(&dir);
        let db = new_uint32_db(&env, 1);
        for k in 0..200u32 {
            insert_row(&db, None, k, b"r");
        }
        env.flush().unwrap();
        // no close: the journal still holds the operations
        drop(db);
        drop(env);
    }

    let env = reopen_env(&dir);
    let db = env.open_db(1, DbConfig::default()).unwrap();
    assert_eq!(db.count(true).unwrap(), 200);
}
