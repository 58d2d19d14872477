use std::convert::TryInto;

use log::debug;

use crate::{
    compress::{self, CompressionKind},
    error::OakError,
    storage::{
        page::{PageType, PAGE_HEADER_SIZE},
        page_manager::PageManager,
    },
    types::OakResult,
};

/// on-disk blob header: allocated_size (u64), size (u64), flags (u32),
/// stored_size (u32)
pub const BLOB_HEADER_SIZE: usize = 24;

const BLOB_FLAG_COMPRESSED: u32 = 0x1;

/// fixed per-blob overhead: the page header of the region's first page
/// plus the blob header
const BLOB_OVERHEAD: usize = PAGE_HEADER_SIZE + BLOB_HEADER_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    /// record payload
    Data,
    /// an overflow key that did not fit into its btree node
    OverflowKey,
}

impl BlobKind {
    fn page_type(&self) -> PageType {
        match self {
            BlobKind::Data => PageType::Blob,
            BlobKind::OverflowKey => PageType::OverflowKey,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BlobHeader {
    /// payload capacity of the region, in bytes
    allocated_size: u64,
    /// logical (uncompressed) size of the blob
    size: u64,
    flags: u32,
    /// bytes actually stored; differs from `size` when compressed
    stored_size: u32,
}

impl BlobHeader {
    fn is_compressed(&self) -> bool {
        self.flags & BLOB_FLAG_COMPRESSED != 0
    }

    fn encode(&self) -> [u8; BLOB_HEADER_SIZE] {
        let mut buf = [0u8; BLOB_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.allocated_size.to_le_bytes());
        buf[8..16].copy_from_slice(&self.size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.flags.to_le_bytes());
        buf[20..24].copy_from_slice(&self.stored_size.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> BlobHeader {
        BlobHeader {
            allocated_size: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            size: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            flags: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            stored_size: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
        }
    }
}

/// Stores variable-length byte strings across one or more contiguous
/// pages. A blob id is the device offset of the blob header, which
/// sits right behind the page header of the region's first page;
/// continuation pages carry raw payload. Blob I/O goes straight to the
/// device and never through the page cache.
pub struct BlobManager;

impl BlobManager {
    pub fn new() -> Self {
        Self
    }

    pub fn allocate(
        &self,
        pm: &mut PageManager,
        data: &[u8],
        kind: BlobKind,
        compression: CompressionKind,
    ) -> Result<u64, OakError> {
        let (stored, compressed) = self.pack(data, compression)?;

        let region_bytes = pm.region_size((BLOB_OVERHEAD + stored.len()) as u64);
        let region = pm.alloc_region(region_bytes)?;

        let header = BlobHeader {
            allocated_size: region_bytes - BLOB_OVERHEAD as u64,
            size: data.len() as u64,
            flags: if compressed { BLOB_FLAG_COMPRESSED } else { 0 },
            stored_size: stored.len() as u32,
        };
        self.write_region(pm, region, kind, &header, &stored)?;

        let blob_id = region + PAGE_HEADER_SIZE as u64;
        debug!(
            "blob allocated: id {:#x}, size {}, stored {}",
            blob_id,
            data.len(),
            stored.len()
        );
        Ok(blob_id)
    }

    /// Allocates a zeroed blob with `capacity` payload bytes. Used for
    /// partial writes into fresh records and for the persisted
    /// freelist.
    pub fn allocate_zeroed(
        &self,
        pm: &mut PageManager,
        capacity: u64,
        kind: BlobKind,
    ) -> Result<u64, OakError> {
        let region_bytes = pm.region_size(BLOB_OVERHEAD as u64 + capacity);
        let region = pm.alloc_region(region_bytes)?;

        let header = BlobHeader {
            allocated_size: region_bytes - BLOB_OVERHEAD as u64,
            size: capacity,
            flags: 0,
            stored_size: capacity as u32,
        };
        let zeroes = vec![0u8; capacity as usize];
        self.write_region(pm, region, kind, &header, &zeroes)?;
        Ok(region + PAGE_HEADER_SIZE as u64)
    }

    pub fn read(&self, pm: &mut PageManager, blob_id: u64) -> Result<Vec<u8>, OakError> {
        let header = self.read_header(pm, blob_id)?;
        let device = pm.device();

        let mut stored = vec![0u8; header.stored_size as usize];
        device.read(blob_id + BLOB_HEADER_SIZE as u64, &mut stored)?;

        if header.is_compressed() {
            return compress::decompress(CompressionKind::Zlib, &stored, header.size as usize);
        }
        stored.truncate(header.size as usize);
        Ok(stored)
    }

    /// Reads `size` bytes starting at `offset`. Rejected for
    /// compressed blobs.
    pub fn read_partial(
        &self,
        pm: &mut PageManager,
        blob_id: u64,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, OakError> {
        let header = self.read_header(pm, blob_id)?;
        if header.is_compressed() {
            return Err(OakError::invalid_parameter(
                "partial read is not allowed on compressed records",
            ));
        }
        if offset + size > header.size {
            return Err(OakError::invalid_parameter(&format!(
                "partial read beyond record size: {} + {} > {}",
                offset, size, header.size
            )));
        }

        let mut buf = vec![0u8; size as usize];
        pm.device()
            .read(blob_id + BLOB_HEADER_SIZE as u64 + offset, &mut buf)?;
        Ok(buf)
    }

    pub fn get_size(&self, pm: &mut PageManager, blob_id: u64) -> Result<u64, OakError> {
        Ok(self.read_header(pm, blob_id)?.size)
    }

    /// Replaces the blob's contents. Returns the (possibly new) blob
    /// id; the id changes when the record no longer fits into the
    /// existing region.
    pub fn overwrite(
        &self,
        pm: &mut PageManager,
        blob_id: u64,
        data: &[u8],
        kind: BlobKind,
        compression: CompressionKind,
    ) -> Result<u64, OakError> {
        let header = self.read_header(pm, blob_id)?;
        let (stored, compressed) = self.pack(data, compression)?;

        if stored.len() as u64 <= header.allocated_size {
            let new_header = BlobHeader {
                allocated_size: header.allocated_size,
                size: data.len() as u64,
                flags: if compressed { BLOB_FLAG_COMPRESSED } else { 0 },
                stored_size: stored.len() as u32,
            };
            let device = pm.device();
            device.write(blob_id, &new_header.encode())?;
            device.write(blob_id + BLOB_HEADER_SIZE as u64, &stored)?;
            return Ok(blob_id);
        }

        // in-place overwrite is impossible, relocate
        self.erase(pm, blob_id)?;
        self.allocate(pm, data, kind, compression)
    }

    /// Overwrites the byte window `[offset, offset + data.len())`.
    /// Bytes outside the window keep their value; a gap between the
    /// old record size and `offset` is zero-filled.
    pub fn overwrite_partial(
        &self,
        pm: &mut PageManager,
        blob_id: u64,
        offset: u64,
        data: &[u8],
        kind: BlobKind,
    ) -> Result<u64, OakError> {
        let header = self.read_header(pm, blob_id)?;
        if header.is_compressed() {
            return Err(OakError::invalid_parameter(
                "partial write is not allowed on compressed records",
            ));
        }

        let new_size = header.size.max(offset + data.len() as u64);
        if new_size <= header.allocated_size {
            let device = pm.device();
            if offset > header.size {
                // zero-fill the hole, region memory may be recycled
                let hole = vec![0u8; (offset - header.size) as usize];
                device.write(blob_id + BLOB_HEADER_SIZE as u64 + header.size, &hole)?;
            }
            device.write(blob_id + BLOB_HEADER_SIZE as u64 + offset, data)?;

            let new_header = BlobHeader {
                size: new_size,
                stored_size: new_size as u32,
                ..header
            };
            device.write(blob_id, &new_header.encode())?;
            return Ok(blob_id);
        }

        // the window grows the record beyond its region: rebuild
        let mut full = self.read(pm, blob_id)?;
        full.resize(new_size as usize, 0);
        full[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        self.erase(pm, blob_id)?;
        self.allocate(pm, &full, kind, CompressionKind::None)
    }

    /// Writes raw stored bytes without touching the header. Used by
    /// the page manager when it persists the freelist into a
    /// pre-sized blob.
    pub fn write_at(
        &self,
        pm: &mut PageManager,
        blob_id: u64,
        offset: u64,
        data: &[u8],
    ) -> OakResult {
        let header = self.read_header(pm, blob_id)?;
        if offset + data.len() as u64 > header.allocated_size {
            return Err(OakError::invalid_parameter("write beyond blob capacity"));
        }
        pm.device()
            .write(blob_id + BLOB_HEADER_SIZE as u64 + offset, data)
    }

    /// Blobs are erased explicitly; the whole region returns to the
    /// freelist.
    pub fn erase(&self, pm: &mut PageManager, blob_id: u64) -> OakResult {
        let header = self.read_header(pm, blob_id)?;
        let region = blob_id - PAGE_HEADER_SIZE as u64;
        let region_bytes = BLOB_OVERHEAD as u64 + header.allocated_size;
        debug!("blob erased: id {:#x}, region {} bytes", blob_id, region_bytes);
        pm.free_region(region, region_bytes);
        Ok(())
    }

    fn read_header(&self, pm: &mut PageManager, blob_id: u64) -> Result<BlobHeader, OakError> {
        if blob_id < PAGE_HEADER_SIZE as u64 {
            return Err(OakError::invalid_parameter("invalid blob id"));
        }
        let mut buf = [0u8; BLOB_HEADER_SIZE];
        pm.device().read(blob_id, &mut buf)?;
        let header = BlobHeader::decode(&buf);
        if header.stored_size as u64 > header.allocated_size {
            return Err(OakError::integrity("blob header is corrupt"));
        }
        Ok(header)
    }

    fn pack(
        &self,
        data: &[u8],
        compression: CompressionKind,
    ) -> Result<(Vec<u8>, bool), OakError> {
        if compression.is_enabled() {
            let packed = compress::compress(compression, data)?;
            if packed.len() < data.len() {
                return Ok((packed, true));
            }
        }
        Ok((data.to_vec(), false))
    }

    fn write_region(
        &self,
        pm: &mut PageManager,
        region: u64,
        kind: BlobKind,
        header: &BlobHeader,
        stored: &[u8],
    ) -> OakResult {
        let device = pm.device();

        // stamp the page header of the region's first page
        let mut page_header = [0u8; PAGE_HEADER_SIZE];
        page_header[4] = kind.page_type() as u8;
        device.write(region, &page_header)?;

        device.write(region + PAGE_HEADER_SIZE as u64, &header.encode())?;
        device.write(region + BLOB_OVERHEAD as u64, stored)?;

        // make sure the region covers whole pages on the device even
        // when the payload ends short of the last page
        let region_end = region + BLOB_OVERHEAD as u64 + header.allocated_size;
        if device.file_size()? < region_end {
            device.write(region_end - 1, &[0u8])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::device::{Device, MemDevice};

    fn setup() -> (PageManager, BlobManager) {
        let device: Arc<dyn Device> = Arc::new(MemDevice::new());
        let pm = PageManager::new(device, 1024, 64 * 1024);
        let blob = BlobManager::new();
        (pm, blob)
    }

    #[test]
    fn test_round_trip() {
        let (mut pm, blob) = setup();
        let data: Vec<u8> = (0..5000).map(|i| (i % 256) as u8).collect();

        let id = blob
            .allocate(&mut pm, &data, BlobKind::Data, CompressionKind::None)
            .unwrap();
        assert_eq!(blob.get_size(&mut pm, id).unwrap(), 5000);
        assert_eq!(blob.read(&mut pm, id).unwrap(), data);
    }

    #[test]
    fn test_partial_read_and_write() {
        let (mut pm, blob) = setup();
        let data = vec![7u8; 3000];
        let id = blob
            .allocate(&mut pm, &data, BlobKind::Data, CompressionKind::None)
            .unwrap();

        let id2 = blob
            .overwrite_partial(&mut pm, id, 1000, &[9u8; 50], BlobKind::Data)
            .unwrap();
        assert_eq!(id, id2);

        let window = blob.read_partial(&mut pm, id, 990, 70).unwrap();
        assert_eq!(&window[..10], &[7u8; 10]);
        assert_eq!(&window[10..60], &[9u8; 50]);
        assert_eq!(&window[60..], &[7u8; 10]);
    }

    #[test]
    fn test_hole_is_zero_filled() {
        let (mut pm, blob) = setup();
        let id = blob
            .allocate(&mut pm, &[1u8; 10], BlobKind::Data, CompressionKind::None)
            .unwrap();

        let id = blob
            .overwrite_partial(&mut pm, id, 100, &[2u8; 10], BlobKind::Data)
            .unwrap();
        let full = blob.read(&mut pm, id).unwrap();
        assert_eq!(full.len(), 110);
        assert_eq!(&full[..10], &[1u8; 10]);
        assert_eq!(&full[10..100], &vec![0u8; 90][..]);
        assert_eq!(&full[100..], &[2u8; 10]);
    }

    #[test]
    fn test_overwrite_relocates_when_grown() {
        let (mut pm, blob) = setup();
        let id = blob
            .allocate(&mut pm, &[1u8; 100], BlobKind::Data, CompressionKind::None)
            .unwrap();

        let big = vec![3u8; 10_000];
        let new_id = blob
            .overwrite(&mut pm, id, &big, BlobKind::Data, CompressionKind::None)
            .unwrap();
        assert_ne!(id, new_id);
        assert_eq!(blob.read(&mut pm, new_id).unwrap(), big);

        // the old region was recycled
        assert!(!pm.freelist().is_empty());
    }

    #[test]
    fn test_compressed_blob() {
        let (mut pm, blob) = setup();
        let data = vec![0u8; 8000];
        let id = blob
            .allocate(&mut pm, &data, BlobKind::Data, CompressionKind::Zlib)
            .unwrap();

        assert_eq!(blob.read(&mut pm, id).unwrap(), data);
        assert_eq!(blob.get_size(&mut pm, id).unwrap(), 8000);

        // partials are rejected on compressed records
        assert!(blob.read_partial(&mut pm, id, 0, 10).is_err());
        assert!(blob
            .overwrite_partial(&mut pm, id, 0, &[1], BlobKind::Data)
            .is_err());
    }
}
