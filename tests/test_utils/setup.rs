use std::path::PathBuf;

use oak_db::{utils, Database, DataType, DbConfig, EnvConfig, Environment};
use tempfile::TempDir;

/// # Conduct the initialization
///
/// - Setting up log configurations.
pub fn setup() {
    utils::init_log();
}

pub fn new_env_dir() -> TempDir {
    tempfile::tempdir().unwrap()
}

pub fn env_path(dir: &TempDir) -> PathBuf {
    dir.path().join("oak.db")
}

pub fn new_env(dir: &TempDir) -> Environment {
    Environment::create(env_path(dir), EnvConfig::default()).unwrap()
}

pub fn new_env_with_config(dir: &TempDir, config: EnvConfig) -> Environment {
    Environment::create(env_path(dir), config).unwrap()
}

pub fn reopen_env(dir: &TempDir) -> Environment {
    Environment::open(env_path(dir), EnvConfig::default()).unwrap()
}

/// A database with little-endian uint32 keys and binary records.
pub fn new_uint32_db(env: &Environment, name: u16) -> Database {
    env.create_db(
        name,
        DbConfig {
            key_type: DataType::UInt32,
            ..Default::default()
        },
    )
    .unwrap()
}

/// A database with variable-length binary keys and records.
pub fn new_binary_db(env: &Environment, name: u16) -> Database {
    env.create_db(name, DbConfig::default()).unwrap()
}

/// A uint32-keyed database with duplicate keys enabled.
pub fn new_dup_db(env: &Environment, name: u16) -> Database {
    env.create_db(
        name,
        DbConfig {
            key_type: DataType::UInt32,
            enable_duplicates: true,
            ..Default::default()
        },
    )
    .unwrap()
}
