use std::convert::TryInto;

use crate::{
    btree::record_list::{decode_cell, encode_cell, RecordRef, DEFAULT_CELL_SIZE},
    error::OakError,
    storage::{blob::BlobKind, BlobManager, PageManager},
    types::OakResult,
};

/// Secondary ordered container for the records of one key, stored as a
/// blob. Layout: count (u32) followed by `count` record cells in
/// duplicate order.
pub struct DuplicateTable {
    pub entries: Vec<RecordRef>,
}

impl DuplicateTable {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn insert_at(&mut self, index: usize, record: RecordRef) {
        let index = index.min(self.entries.len());
        self.entries.insert(index, record);
    }

    pub fn erase_at(&mut self, index: usize) -> RecordRef {
        self.entries.remove(index)
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.entries.len() * DEFAULT_CELL_SIZE);
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            buf.extend_from_slice(&encode_cell(entry));
        }
        buf
    }

    fn decode(bytes: &[u8]) -> Result<Self, OakError> {
        if bytes.len() < 4 {
            return Err(OakError::integrity("duplicate table is truncated"));
        }
        let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        if bytes.len() < 4 + count * DEFAULT_CELL_SIZE {
            return Err(OakError::integrity("duplicate table is truncated"));
        }
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let start = 4 + i * DEFAULT_CELL_SIZE;
            entries.push(decode_cell(&bytes[start..start + DEFAULT_CELL_SIZE])?);
        }
        Ok(Self { entries })
    }
}

pub fn load_table(
    blob: &BlobManager,
    pm: &mut PageManager,
    table_id: u64,
) -> Result<DuplicateTable, OakError> {
    let bytes = blob.read(pm, table_id)?;
    DuplicateTable::decode(&bytes)
}

/// Writes the table back; returns the (possibly relocated) blob id, or
/// creates a fresh blob when `table_id` is None.
pub fn store_table(
    blob: &BlobManager,
    pm: &mut PageManager,
    table: &DuplicateTable,
    table_id: Option<u64>,
) -> Result<u64, OakError> {
    let bytes = table.encode();
    match table_id {
        Some(id) => blob.overwrite(
            pm,
            id,
            &bytes,
            BlobKind::Data,
            crate::compress::CompressionKind::None,
        ),
        None => blob.allocate(
            pm,
            &bytes,
            BlobKind::Data,
            crate::compress::CompressionKind::None,
        ),
    }
}

pub fn erase_table(blob: &BlobManager, pm: &mut PageManager, table_id: u64) -> OakResult {
    blob.erase(pm, table_id)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::device::{Device, MemDevice};

    #[test]
    fn test_table_round_trip_and_ordering() {
        let device: Arc<dyn Device> = Arc::new(MemDevice::new());
        let mut pm = PageManager::new(device, 1024, 64 * 1024);
        let blob = BlobManager::new();

        let mut table = DuplicateTable::new();
        table.insert_at(usize::MAX, RecordRef::Inline(b"A".to_vec()));
        // insert-first goes to index 0, insert-last appends
        table.insert_at(0, RecordRef::Inline(b"B".to_vec()));
        table.insert_at(usize::MAX, RecordRef::Inline(b"C".to_vec()));

        let id = store_table(&blob, &mut pm, &table, None).unwrap();
        let restored = load_table(&blob, &mut pm, id).unwrap();

        let expected: Vec<RecordRef> = vec![
            RecordRef::Inline(b"B".to_vec()),
            RecordRef::Inline(b"A".to_vec()),
            RecordRef::Inline(b"C".to_vec()),
        ];
        assert_eq!(restored.entries, expected);
    }
}
