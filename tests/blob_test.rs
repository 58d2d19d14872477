mod test_utils;

use oak_db::{CompressionKind, DataType, DbConfig, ErrorCode};

use crate::test_utils::{key, new_env, new_env_dir, new_uint32_db, setup};

#[test]
fn test_large_record_partial_overwrite() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);

    // step 1: a 1 MiB record
    let record: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
    db.insert(None, &key(1), &record, 0).unwrap();

    // step 2: overwrite a window in the middle
    let patch = vec![0xEEu8; 100];
    db.partial_overwrite(&key(1), 500_000, &patch).unwrap();

    // step 3: bytes outside the window are unchanged, bytes inside
    // match the new payload
    let full = db.find(None, &key(1)).unwrap();
    assert_eq!(full.len(), record.len());
    assert_eq!(&full[..500_000], &record[..500_000]);
    assert_eq!(&full[500_000..500_100], &patch[..]);
    assert_eq!(&full[500_100..], &record[500_100..]);

    // partial reads see the same bytes
    let window = db.partial_read(&key(1), 499_990, 120).unwrap();
    assert_eq!(&window[..10], &record[499_990..500_000]);
    assert_eq!(&window[10..110], &patch[..]);
}

#[test]
fn test_partial_write_promotion() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);

    db.insert(None, &key(1), &vec![1u8; 4000], 0).unwrap();

    // offset + size == record size behaves exactly like a full write
    db.partial_overwrite(&key(1), 0, &vec![2u8; 4000]).unwrap();
    assert_eq!(db.find(None, &key(1)).unwrap(), vec![2u8; 4000]);
}

#[test]
fn test_partial_write_hole_is_zero_filled() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);

    db.insert(None, &key(1), &vec![7u8; 100], 0).unwrap();
    db.partial_overwrite(&key(1), 10_000, b"tail").unwrap();

    let full = db.find(None, &key(1)).unwrap();
    assert_eq!(full.len(), 10_004);
    assert_eq!(&full[..100], &vec![7u8; 100][..]);
    assert!(full[100..10_000].iter().all(|b| *b == 0));
    assert_eq!(&full[10_000..], b"tail");
}

#[test]
fn test_partial_write_on_missing_key_creates_the_record() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);

    db.partial_overwrite(&key(9), 50, b"xyz").unwrap();
    let full = db.find(None, &key(9)).unwrap();
    assert_eq!(full.len(), 53);
    assert!(full[..50].iter().all(|b| *b == 0));
    assert_eq!(&full[50..], b"xyz");
}

#[test]
fn test_record_compression_round_trip() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = env
        .create_db(
            1,
            DbConfig {
                key_type: DataType::UInt32,
                record_compression: CompressionKind::Zlib,
                ..Default::default()
            },
        )
        .unwrap();

    // highly compressible payload
    let record = vec![0x41u8; 100_000];
    db.insert(None, &key(1), &record, 0).unwrap();
    assert_eq!(db.find(None, &key(1)).unwrap(), record);

    // partial operations are rejected on compressed records
    assert_eq!(
        db.partial_overwrite(&key(1), 10, b"zz").unwrap_err().code(),
        ErrorCode::InvalidParameter
    );

    // incompressible payloads survive too
    let noisy: Vec<u8> = (0..50_000u32)
        .map(|i| (i.wrapping_mul(2654435761) >> 13) as u8)
        .collect();
    db.insert(None, &key(2), &noisy, 0).unwrap();
    assert_eq!(db.find(None, &key(2)).unwrap(), noisy);
}

#[test]
fn test_grown_record_relocates() {
    setup();
    let dir = new_env_dir();
    let env = new_env(&dir);
    let db = new_uint32_db(&env, 1);

    db.insert(None, &key(1), &vec![1u8; 64], 0).unwrap();
    db.insert(
        None,
        &key(1),
        &vec![2u8; 100_000],
        oak_db::config::OVERWRITE,
    )
    .unwrap();
    assert_eq!(db.find(None, &key(1)).unwrap(), vec![2u8; 100_000]);

    db.insert(None, &key(1), b"tiny", oak_db::config::OVERWRITE).unwrap();
    assert_eq!(db.find(None, &key(1)).unwrap(), b"tiny");
}
