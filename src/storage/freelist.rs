use std::io::Read;

use log::debug;

use crate::{
    error::OakError,
    io::{Decodeable, Encodeable, OakWriter},
};

/// A run of free bytes. Both fields are page-aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRange {
    pub address: u64,
    pub size: u64,
}

/// The set of free page runs, kept sorted by address with adjacent
/// ranges coalesced. Persisted as a blob at checkpoint time.
pub struct Freelist {
    ranges: Vec<FreeRange>,
}

impl Freelist {
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    pub fn ranges(&self) -> &[FreeRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns a free run of exactly `size` bytes, or None. Prefers an
    /// exact first-fit, falls back to carving from the smallest range
    /// that is large enough.
    pub fn alloc(&mut self, size: u64) -> Option<u64> {
        // first-fit on equal sizes
        if let Some(pos) = self.ranges.iter().position(|r| r.size == size) {
            let range = self.ranges.remove(pos);
            debug!("freelist: exact fit at {:#x}, size {}", range.address, size);
            return Some(range.address);
        }

        // best-fit: the smallest range that still fits
        let mut best: Option<usize> = None;
        for (pos, range) in self.ranges.iter().enumerate() {
            if range.size < size {
                continue;
            }
            match best {
                Some(b) if self.ranges[b].size <= range.size => {}
                _ => best = Some(pos),
            }
        }

        let pos = best?;
        let address = self.ranges[pos].address;
        self.ranges[pos].address += size;
        self.ranges[pos].size -= size;
        debug!("freelist: best fit at {:#x}, size {}", address, size);
        Some(address)
    }

    /// Returns the range to the freelist, coalescing with its
    /// neighbours.
    pub fn free(&mut self, address: u64, size: u64) {
        if size == 0 {
            return;
        }
        debug_assert!(self.is_disjoint(address, size), "double free at {:#x}", address);

        let pos = self
            .ranges
            .iter()
            .position(|r| r.address > address)
            .unwrap_or(self.ranges.len());
        self.ranges.insert(pos, FreeRange { address, size });

        // merge with the right neighbour
        if pos + 1 < self.ranges.len()
            && self.ranges[pos].address + self.ranges[pos].size == self.ranges[pos + 1].address
        {
            self.ranges[pos].size += self.ranges[pos + 1].size;
            self.ranges.remove(pos + 1);
        }

        // merge with the left neighbour
        if pos > 0
            && self.ranges[pos - 1].address + self.ranges[pos - 1].size == self.ranges[pos].address
        {
            self.ranges[pos - 1].size += self.ranges[pos].size;
            self.ranges.remove(pos);
        }
    }

    fn is_disjoint(&self, address: u64, size: u64) -> bool {
        self.ranges
            .iter()
            .all(|r| address + size <= r.address || r.address + r.size <= address)
    }
}

/// # Format
///
/// - 4 bytes: range count
/// - per range: 8 bytes address, 8 bytes size
impl Encodeable for Freelist {
    fn encode(&self) -> Vec<u8> {
        let mut writer = OakWriter::new();
        writer.write(&(self.ranges.len() as u32));
        for range in &self.ranges {
            writer.write(&range.address);
            writer.write(&range.size);
        }
        writer.to_bytes()
    }
}

impl Decodeable for Freelist {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, OakError> {
        let count = u32::decode_from(reader)?;
        let mut ranges = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let address = u64::decode_from(reader)?;
            let size = u64::decode_from(reader)?;
            ranges.push(FreeRange { address, size });
        }
        Ok(Self { ranges })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalesce() {
        let mut freelist = Freelist::new();
        freelist.free(8192, 4096);
        freelist.free(4096, 4096);
        freelist.free(20480, 4096);

        // [4096..12288) and [20480..24576)
        assert_eq!(freelist.ranges().len(), 2);
        assert_eq!(freelist.ranges()[0].address, 4096);
        assert_eq!(freelist.ranges()[0].size, 8192);

        // the hole between them closes into one range
        freelist.free(12288, 8192);
        assert_eq!(freelist.ranges().len(), 1);
        assert_eq!(freelist.ranges()[0].size, 20480);
    }

    #[test]
    fn test_alloc_prefers_exact_fit() {
        let mut freelist = Freelist::new();
        freelist.free(4096, 8192);
        freelist.free(40960, 4096);

        // the exact 4096 range wins over carving the larger one
        assert_eq!(freelist.alloc(4096), Some(40960));

        // then best-fit carves from the front of the big range
        assert_eq!(freelist.alloc(4096), Some(4096));
        assert_eq!(freelist.ranges()[0].address, 8192);
        assert_eq!(freelist.ranges()[0].size, 4096);

        assert_eq!(freelist.alloc(65536), None);
    }

    #[test]
    fn test_encode_round_trip() {
        let mut freelist = Freelist::new();
        freelist.free(4096, 4096);
        freelist.free(16384, 12288);

        let bytes = freelist.encode();
        let restored = Freelist::decode_from(&mut std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(restored.ranges(), freelist.ranges());
    }
}
