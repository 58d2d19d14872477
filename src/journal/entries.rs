use std::io::Read;

use crate::{
    compress::{self, CompressionKind},
    error::OakError,
    io::{read_exact, Decodeable, Encodeable, OakWriter},
};

/// packed size of the common entry header: lsn (u64), txn_id (u64),
/// dbname (u16), type (u8), followup_size (u32)
pub const ENTRY_HEADER_SIZE: usize = 23;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    TxnBegin = 1,
    TxnAbort = 2,
    TxnCommit = 3,
    Insert = 4,
    Erase = 5,
    Changeset = 6,
}

impl EntryType {
    pub fn from_u8(value: u8) -> Option<EntryType> {
        match value {
            1 => Some(EntryType::TxnBegin),
            2 => Some(EntryType::TxnAbort),
            3 => Some(EntryType::TxnCommit),
            4 => Some(EntryType::Insert),
            5 => Some(EntryType::Erase),
            6 => Some(EntryType::Changeset),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntryHeader {
    pub lsn: u64,
    pub txn_id: u64,
    pub dbname: u16,
    pub kind: EntryType,
    pub followup_size: u32,
}

impl Encodeable for EntryHeader {
    fn encode(&self) -> Vec<u8> {
        let mut writer = OakWriter::new();
        writer.write(&self.lsn);
        writer.write(&self.txn_id);
        writer.write(&self.dbname);
        writer.write(&(self.kind as u8));
        writer.write(&self.followup_size);
        writer.to_bytes()
    }
}

impl Decodeable for EntryHeader {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, OakError> {
        let lsn = u64::decode_from(reader)?;
        let txn_id = u64::decode_from(reader)?;
        let dbname = u16::decode_from(reader)?;
        let kind = EntryType::from_u8(u8::decode_from(reader)?)
            .ok_or_else(|| OakError::io("invalid journal entry type"))?;
        let followup_size = u32::decode_from(reader)?;
        Ok(Self {
            lsn,
            txn_id,
            dbname,
            kind,
            followup_size,
        })
    }
}

/// Payload of an insert entry. Compressed sizes of 0 mean the bytes
/// are stored uncompressed.
#[derive(Debug, Clone)]
pub struct InsertPayload {
    pub insert_flags: u32,
    pub key: Vec<u8>,
    pub record: Vec<u8>,
}

impl InsertPayload {
    pub fn encode(&self, compression: CompressionKind) -> Result<Vec<u8>, OakError> {
        let (key_bytes, compressed_key_size) = pack(&self.key, compression)?;
        let (record_bytes, compressed_record_size) = pack(&self.record, compression)?;

        let mut writer = OakWriter::new();
        writer.write(&(self.key.len() as u16));
        writer.write(&(self.record.len() as u32));
        writer.write(&self.insert_flags);
        writer.write(&compressed_key_size);
        writer.write(&compressed_record_size);
        writer.write_bytes(&key_bytes);
        writer.write_bytes(&record_bytes);
        Ok(writer.to_bytes())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, OakError> {
        let mut reader = std::io::Cursor::new(bytes);
        let key_size = u16::decode_from(&mut reader)? as usize;
        let record_size = u32::decode_from(&mut reader)? as usize;
        let insert_flags = u32::decode_from(&mut reader)?;
        let compressed_key_size = u32::decode_from(&mut reader)? as usize;
        let compressed_record_size = u32::decode_from(&mut reader)? as usize;

        let key = unpack(&mut reader, key_size, compressed_key_size)?;
        let record = unpack(&mut reader, record_size, compressed_record_size)?;
        Ok(Self {
            insert_flags,
            key,
            record,
        })
    }
}

/// Payload of an erase entry. `duplicate` of 0 erases the whole key,
/// any other value erases duplicate `duplicate - 1`.
#[derive(Debug, Clone)]
pub struct ErasePayload {
    pub duplicate: u32,
    pub erase_flags: u32,
    pub key: Vec<u8>,
}

impl ErasePayload {
    pub fn encode(&self, compression: CompressionKind) -> Result<Vec<u8>, OakError> {
        let (key_bytes, compressed_key_size) = pack(&self.key, compression)?;

        let mut writer = OakWriter::new();
        writer.write(&(self.key.len() as u16));
        writer.write(&self.duplicate);
        writer.write(&self.erase_flags);
        writer.write(&compressed_key_size);
        writer.write_bytes(&key_bytes);
        Ok(writer.to_bytes())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, OakError> {
        let mut reader = std::io::Cursor::new(bytes);
        let key_size = u16::decode_from(&mut reader)? as usize;
        let duplicate = u32::decode_from(&mut reader)?;
        let erase_flags = u32::decode_from(&mut reader)?;
        let compressed_key_size = u32::decode_from(&mut reader)? as usize;
        let key = unpack(&mut reader, key_size, compressed_key_size)?;
        Ok(Self {
            duplicate,
            erase_flags,
            key,
        })
    }
}

/// Changeset entry payload: {num_pages, freelist blob id} followed by
/// num_pages x {address, compressed_size, page bytes}.
#[derive(Debug, Clone)]
pub struct ChangesetHeader {
    pub num_pages: u32,
    pub freelist_blob_id: u64,
}

impl Encodeable for ChangesetHeader {
    fn encode(&self) -> Vec<u8> {
        let mut writer = OakWriter::new();
        writer.write(&self.num_pages);
        writer.write(&self.freelist_blob_id);
        writer.to_bytes()
    }
}

impl Decodeable for ChangesetHeader {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, OakError> {
        Ok(Self {
            num_pages: u32::decode_from(reader)?,
            freelist_blob_id: u64::decode_from(reader)?,
        })
    }
}

/// Per-page header inside a changeset. `compressed_size` of 0 means a
/// raw page of the configured page size follows.
#[derive(Debug, Clone)]
pub struct ChangesetPageHeader {
    pub address: u64,
    pub compressed_size: u32,
}

impl Encodeable for ChangesetPageHeader {
    fn encode(&self) -> Vec<u8> {
        let mut writer = OakWriter::new();
        writer.write(&self.address);
        writer.write(&self.compressed_size);
        writer.to_bytes()
    }
}

impl Decodeable for ChangesetPageHeader {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, OakError> {
        Ok(Self {
            address: u64::decode_from(reader)?,
            compressed_size: u32::decode_from(reader)?,
        })
    }
}

fn pack(data: &[u8], compression: CompressionKind) -> Result<(Vec<u8>, u32), OakError> {
    if compression.is_enabled() && !data.is_empty() {
        let packed = compress::compress(compression, data)?;
        if packed.len() < data.len() {
            let size = packed.len() as u32;
            return Ok((packed, size));
        }
    }
    Ok((data.to_vec(), 0))
}

fn unpack<R: Read>(
    reader: &mut R,
    size: usize,
    compressed_size: usize,
) -> Result<Vec<u8>, OakError> {
    if compressed_size == 0 {
        return read_exact(reader, size);
    }
    let packed = read_exact(reader, compressed_size)?;
    compress::decompress(CompressionKind::Zlib, &packed, size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_payload_round_trip() {
        let payload = InsertPayload {
            insert_flags: 7,
            key: b"key".to_vec(),
            record: vec![0u8; 4096],
        };
        for kind in [CompressionKind::None, CompressionKind::Zlib].iter() {
            let bytes = payload.encode(*kind).unwrap();
            let restored = InsertPayload::decode(&bytes).unwrap();
            assert_eq!(restored.key, payload.key);
            assert_eq!(restored.record, payload.record);
            assert_eq!(restored.insert_flags, 7);
        }
    }

    #[test]
    fn test_erase_payload_round_trip() {
        let payload = ErasePayload {
            duplicate: 3,
            erase_flags: 0,
            key: b"some key".to_vec(),
        };
        let bytes = payload.encode(CompressionKind::None).unwrap();
        let restored = ErasePayload::decode(&bytes).unwrap();
        assert_eq!(restored.key, payload.key);
        assert_eq!(restored.duplicate, 3);
    }

    #[test]
    fn test_header_size() {
        let header = EntryHeader {
            lsn: 1,
            txn_id: 2,
            dbname: 3,
            kind: EntryType::Insert,
            followup_size: 4,
        };
        assert_eq!(header.encode().len(), ENTRY_HEADER_SIZE);
    }
}
