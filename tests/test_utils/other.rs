use oak_db::{Database, Transaction};

pub fn key(value: u32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn insert_row(db: &Database, txn: Option<&Transaction>, k: u32, record: &[u8]) {
    db.insert(txn, &key(k), record, 0).unwrap();
}

pub fn key_present(db: &Database, txn: Option<&Transaction>, k: u32) -> bool {
    db.find(txn, &key(k)).is_ok()
}

/// Walks the whole database with a cursor and returns the keys in
/// visit order.
pub fn collect_keys(db: &Database) -> Vec<Vec<u8>> {
    let mut cursor = db.cursor().unwrap();
    let mut keys = Vec::new();
    while let Some((k, _)) = cursor.move_next().unwrap() {
        keys.push(k);
    }
    keys
}
