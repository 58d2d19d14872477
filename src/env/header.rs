use std::convert::TryInto;

use crate::{
    config::{HEADER_MAGIC, VERSION},
    error::{ErrorCode, OakError},
    storage::page::{Page, PAGE_HEADER_SIZE},
};

/// fixed part of the environment header, within the header page
/// payload: magic (4), version (4), page size (4), max databases (2),
/// freelist blob id (8), journal compression (4), reserved up to 48
pub const ENV_HEADER_SIZE: usize = 48;

/// packed size of one database descriptor
pub const DESCRIPTOR_SIZE: usize = 32;

const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_PAGE_SIZE: usize = 8;
const OFF_MAX_DATABASES: usize = 12;
const OFF_FREELIST_BLOB_ID: usize = 14;
const OFF_JOURNAL_COMPRESSION: usize = 22;

#[derive(Debug, Clone)]
pub struct EnvHeader {
    pub page_size: u32,
    pub max_databases: u16,
    pub freelist_blob_id: u64,
    pub journal_compression: u32,
}

impl EnvHeader {
    pub fn write_to(&self, page: &mut Page) {
        let payload = page.payload_mut();
        payload[OFF_MAGIC..OFF_MAGIC + 4].copy_from_slice(&HEADER_MAGIC);
        payload[OFF_VERSION..OFF_VERSION + 4].copy_from_slice(&VERSION);
        payload[OFF_PAGE_SIZE..OFF_PAGE_SIZE + 4].copy_from_slice(&self.page_size.to_le_bytes());
        payload[OFF_MAX_DATABASES..OFF_MAX_DATABASES + 2]
            .copy_from_slice(&self.max_databases.to_le_bytes());
        payload[OFF_FREELIST_BLOB_ID..OFF_FREELIST_BLOB_ID + 8]
            .copy_from_slice(&self.freelist_blob_id.to_le_bytes());
        payload[OFF_JOURNAL_COMPRESSION..OFF_JOURNAL_COMPRESSION + 4]
            .copy_from_slice(&self.journal_compression.to_le_bytes());
        page.set_dirty(true);
    }

    pub fn read_from(page: &Page) -> Result<EnvHeader, OakError> {
        Self::parse(page.payload())
    }

    /// Parses the header out of a raw payload slice. Used both for
    /// cached header pages and for the bootstrap read that discovers
    /// the page size before the page manager exists.
    pub fn parse(payload: &[u8]) -> Result<EnvHeader, OakError> {
        if payload.len() < ENV_HEADER_SIZE {
            return Err(OakError::new(
                ErrorCode::InvalidFileHeader,
                "header page is truncated",
            ));
        }
        if payload[OFF_MAGIC..OFF_MAGIC + 4] != HEADER_MAGIC {
            return Err(OakError::new(
                ErrorCode::InvalidFileHeader,
                "not an environment file",
            ));
        }
        // only the file-format version is load-bearing
        if payload[OFF_VERSION + 3] != VERSION[3] {
            return Err(OakError::new(
                ErrorCode::InvalidFileVersion,
                &format!(
                    "unsupported file version {}",
                    payload[OFF_VERSION + 3]
                ),
            ));
        }
        Ok(EnvHeader {
            page_size: u32::from_le_bytes(
                payload[OFF_PAGE_SIZE..OFF_PAGE_SIZE + 4].try_into().unwrap(),
            ),
            max_databases: u16::from_le_bytes(
                payload[OFF_MAX_DATABASES..OFF_MAX_DATABASES + 2]
                    .try_into()
                    .unwrap(),
            ),
            freelist_blob_id: u64::from_le_bytes(
                payload[OFF_FREELIST_BLOB_ID..OFF_FREELIST_BLOB_ID + 8]
                    .try_into()
                    .unwrap(),
            ),
            journal_compression: u32::from_le_bytes(
                payload[OFF_JOURNAL_COMPRESSION..OFF_JOURNAL_COMPRESSION + 4]
                    .try_into()
                    .unwrap(),
            ),
        })
    }

    /// Bytes to read from the start of the file to parse the fixed
    /// header before the page size is known.
    pub fn bootstrap_len() -> usize {
        PAGE_HEADER_SIZE + ENV_HEADER_SIZE
    }
}

/// The persisted btree descriptor of one database. A `dbname` of 0
/// marks a free slot.
#[derive(Debug, Clone, Default)]
pub struct BTreeDescriptor {
    pub root_address: u64,
    pub flags: u32,
    pub dbname: u16,
    pub key_size: u16,
    pub key_type: u16,
    pub compression: u8,
    pub record_size: u32,
    pub compare_hash: u32,
    pub record_type: u16,
}

impl BTreeDescriptor {
    fn encode(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut buf = [0u8; DESCRIPTOR_SIZE];
        buf[0..8].copy_from_slice(&self.root_address.to_le_bytes());
        buf[8..12].copy_from_slice(&self.flags.to_le_bytes());
        buf[12..14].copy_from_slice(&self.dbname.to_le_bytes());
        buf[14..16].copy_from_slice(&self.key_size.to_le_bytes());
        buf[16..18].copy_from_slice(&self.key_type.to_le_bytes());
        buf[18] = self.compression;
        // byte 19 reserved
        buf[20..24].copy_from_slice(&self.record_size.to_le_bytes());
        buf[24..28].copy_from_slice(&self.compare_hash.to_le_bytes());
        buf[28..30].copy_from_slice(&self.record_type.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> BTreeDescriptor {
        BTreeDescriptor {
            root_address: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            flags: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            dbname: u16::from_le_bytes(buf[12..14].try_into().unwrap()),
            key_size: u16::from_le_bytes(buf[14..16].try_into().unwrap()),
            key_type: u16::from_le_bytes(buf[16..18].try_into().unwrap()),
            compression: buf[18],
            record_size: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            compare_hash: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
            record_type: u16::from_le_bytes(buf[28..30].try_into().unwrap()),
        }
    }
}

pub fn read_descriptor(page: &Page, index: usize) -> BTreeDescriptor {
    let start = ENV_HEADER_SIZE + index * DESCRIPTOR_SIZE;
    BTreeDescriptor::decode(&page.payload()[start..start + DESCRIPTOR_SIZE])
}

pub fn write_descriptor(page: &mut Page, index: usize, descriptor: &BTreeDescriptor) {
    let start = ENV_HEADER_SIZE + index * DESCRIPTOR_SIZE;
    page.payload_mut()[start..start + DESCRIPTOR_SIZE].copy_from_slice(&descriptor.encode());
    page.set_dirty(true);
}

/// How many descriptor slots fit into a header page.
pub fn descriptor_capacity(page_size: usize) -> usize {
    (page_size - PAGE_HEADER_SIZE - ENV_HEADER_SIZE) / DESCRIPTOR_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PageType;

    #[test]
    fn test_header_round_trip() {
        let mut page = Page::new_empty(0, 4096, PageType::Header);
        let header = EnvHeader {
            page_size: 4096,
            max_databases: 16,
            freelist_blob_id: 99,
            journal_compression: 1,
        };
        header.write_to(&mut page);

        let restored = EnvHeader::read_from(&page).unwrap();
        assert_eq!(restored.page_size, 4096);
        assert_eq!(restored.max_databases, 16);
        assert_eq!(restored.freelist_blob_id, 99);
        assert_eq!(restored.journal_compression, 1);
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let page = Page::new_empty(0, 4096, PageType::Header);
        let err = EnvHeader::read_from(&page).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidFileHeader);
    }

    #[test]
    fn test_descriptor_round_trip() {
        let mut page = Page::new_empty(0, 4096, PageType::Header);
        let descriptor = BTreeDescriptor {
            root_address: 8192,
            flags: 3,
            dbname: 7,
            key_size: 4,
            key_type: 3,
            compression: 1,
            record_size: u32::MAX,
            compare_hash: 0xABCD,
            record_type: 0,
        };
        write_descriptor(&mut page, 5, &descriptor);

        let restored = read_descriptor(&page, 5);
        assert_eq!(restored.root_address, 8192);
        assert_eq!(restored.dbname, 7);
        assert_eq!(restored.compare_hash, 0xABCD);

        // neighbouring slots stay free
        assert_eq!(read_descriptor(&page, 4).dbname, 0);
        assert_eq!(read_descriptor(&page, 6).dbname, 0);
    }
}
