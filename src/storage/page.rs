use std::convert::TryInto;

/// Size of the header carried by every page: flags (u32), page type
/// (u8), 3 reserved bytes, lsn (u64).
pub const PAGE_HEADER_SIZE: usize = 16;

const OFFSET_FLAGS: usize = 0;
const OFFSET_TYPE: usize = 4;
const OFFSET_LSN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Header = 1,
    BTreeRoot = 2,
    BTreeInternal = 3,
    BTreeLeaf = 4,
    Freelist = 5,
    Blob = 6,
    OverflowKey = 7,
}

impl PageType {
    pub fn from_u8(value: u8) -> Option<PageType> {
        match value {
            1 => Some(PageType::Header),
            2 => Some(PageType::BTreeRoot),
            3 => Some(PageType::BTreeInternal),
            4 => Some(PageType::BTreeLeaf),
            5 => Some(PageType::Freelist),
            6 => Some(PageType::Blob),
            7 => Some(PageType::OverflowKey),
            _ => None,
        }
    }
}

/// A fixed-size block of storage. `data` holds the full on-disk image,
/// including the per-page header; accessors parse the header in place.
///
/// The dirty bit is set whenever the payload differs from the on-disk
/// copy. It lives only in memory.
pub struct Page {
    address: u64,
    data: Vec<u8>,
    dirty: bool,
}

impl Page {
    pub fn new_empty(address: u64, page_size: usize, ptype: PageType) -> Self {
        let mut page = Self {
            address,
            data: vec![0; page_size],
            dirty: true,
        };
        page.set_ptype(ptype);
        page
    }

    pub fn from_bytes(address: u64, data: Vec<u8>) -> Self {
        Self {
            address,
            data,
            dirty: false,
        }
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    pub fn flags(&self) -> u32 {
        u32::from_le_bytes(self.data[OFFSET_FLAGS..OFFSET_FLAGS + 4].try_into().unwrap())
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.data[OFFSET_FLAGS..OFFSET_FLAGS + 4].copy_from_slice(&flags.to_le_bytes());
        self.dirty = true;
    }

    pub fn ptype(&self) -> Option<PageType> {
        PageType::from_u8(self.data[OFFSET_TYPE])
    }

    pub fn set_ptype(&mut self, ptype: PageType) {
        self.data[OFFSET_TYPE] = ptype as u8;
        self.dirty = true;
    }

    pub fn lsn(&self) -> u64 {
        u64::from_le_bytes(self.data[OFFSET_LSN..OFFSET_LSN + 8].try_into().unwrap())
    }

    pub fn set_lsn(&mut self, lsn: u64) {
        self.data[OFFSET_LSN..OFFSET_LSN + 8].copy_from_slice(&lsn.to_le_bytes());
        self.dirty = true;
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[PAGE_HEADER_SIZE..]
    }

    /// Callers must pair this with `set_dirty`.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[PAGE_HEADER_SIZE..]
    }

    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }

    pub fn overwrite_raw(&mut self, data: &[u8]) {
        self.data.copy_from_slice(data);
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let mut page = Page::new_empty(4096, 4096, PageType::BTreeLeaf);
        page.set_lsn(99);
        page.set_flags(3);

        assert_eq!(page.ptype(), Some(PageType::BTreeLeaf));
        assert_eq!(page.lsn(), 99);
        assert_eq!(page.flags(), 3);
        assert_eq!(page.payload().len(), 4096 - PAGE_HEADER_SIZE);

        let raw = page.raw_data().to_vec();
        let restored = Page::from_bytes(4096, raw);
        assert_eq!(restored.lsn(), 99);
        assert!(!restored.is_dirty());
    }
}
