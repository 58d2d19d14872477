use std::convert::TryInto;

use crate::error::OakError;

/// bytes per slot in the variable-layout index array (offset u16,
/// size u16)
const VAR_INDEX_ENTRY: usize = 4;

/// size marker for a key that lives in an overflow blob; the heap cell
/// holds the 8-byte blob id instead of the key bytes
const EXTENDED_MARKER: u16 = 0xFFFF;

const EXTENDED_CELL_SIZE: usize = 8;

/// A key as stored in a node: the bytes themselves, or the id of an
/// overflow blob for keys that are too large to keep in the node.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyCell {
    Inline(Vec<u8>),
    Extended(u64),
}

impl KeyCell {
    pub fn cell_len(&self) -> usize {
        match self {
            KeyCell::Inline(bytes) => bytes.len(),
            KeyCell::Extended(_) => EXTENDED_CELL_SIZE,
        }
    }
}

/// The in-node key layout, fixed when the database is created.
///
/// `Fixed` stores keys back to back at `size` bytes each. `Var` keeps
/// a slot index at the front of the region and a cell heap growing
/// down from its end; erased cells leave holes until `vacuumize`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyList {
    Fixed { size: usize },
    Var { max_inline: usize },
}

impl KeyList {
    /// Rough per-slot footprint, used to place the KeyList/RecordList
    /// boundary when a node is initialized.
    pub fn estimated_slot_size(&self) -> usize {
        match self {
            KeyList::Fixed { size } => *size,
            KeyList::Var { max_inline } => VAR_INDEX_ENTRY + (*max_inline).min(32),
        }
    }

    pub fn max_inline(&self) -> usize {
        match self {
            KeyList::Fixed { size } => *size,
            KeyList::Var { max_inline } => *max_inline,
        }
    }

    pub fn get(&self, region: &[u8], slot: usize) -> KeyCell {
        match self {
            KeyList::Fixed { size } => {
                KeyCell::Inline(region[slot * size..(slot + 1) * size].to_vec())
            }
            KeyList::Var { .. } => {
                let (off, size) = var_index(region, slot);
                if size == EXTENDED_MARKER {
                    let id =
                        u64::from_le_bytes(region[off..off + 8].try_into().unwrap());
                    KeyCell::Extended(id)
                } else {
                    KeyCell::Inline(region[off..off + size as usize].to_vec())
                }
            }
        }
    }

    pub fn has_room(&self, region: &[u8], count: usize, cell_len: usize) -> bool {
        match self {
            KeyList::Fixed { size } => (count + 1) * size <= region.len(),
            KeyList::Var { .. } => {
                (count + 1) * VAR_INDEX_ENTRY + cell_len <= heap_low(region, count)
            }
        }
    }

    /// Bytes reclaimable by `vacuumize`.
    pub fn wasted(&self, region: &[u8], count: usize) -> usize {
        match self {
            KeyList::Fixed { .. } => 0,
            KeyList::Var { .. } => {
                let used: usize = (0..count).map(|i| cell_len_at(region, i)).sum();
                region.len() - heap_low(region, count) - used
            }
        }
    }

    pub fn insert(
        &self,
        region: &mut [u8],
        count: usize,
        slot: usize,
        cell: &KeyCell,
    ) -> Result<(), OakError> {
        if !self.has_room(region, count, cell.cell_len()) {
            return Err(OakError::integrity("key list is full"));
        }
        match self {
            KeyList::Fixed { size } => {
                let bytes = match cell {
                    KeyCell::Inline(bytes) => bytes,
                    KeyCell::Extended(_) => {
                        return Err(OakError::integrity(
                            "fixed key list cannot hold overflow keys",
                        ))
                    }
                };
                if bytes.len() != *size {
                    return Err(OakError::invalid_parameter("wrong key size"));
                }
                region.copy_within(slot * size..count * size, (slot + 1) * size);
                region[slot * size..(slot + 1) * size].copy_from_slice(bytes);
            }
            KeyList::Var { .. } => {
                let new_off = heap_low(region, count) - cell.cell_len();
                match cell {
                    KeyCell::Inline(bytes) => {
                        region[new_off..new_off + bytes.len()].copy_from_slice(bytes);
                    }
                    KeyCell::Extended(id) => {
                        region[new_off..new_off + 8].copy_from_slice(&id.to_le_bytes());
                    }
                }
                region.copy_within(
                    slot * VAR_INDEX_ENTRY..count * VAR_INDEX_ENTRY,
                    (slot + 1) * VAR_INDEX_ENTRY,
                );
                let size = match cell {
                    KeyCell::Inline(bytes) => bytes.len() as u16,
                    KeyCell::Extended(_) => EXTENDED_MARKER,
                };
                set_var_index(region, slot, new_off as u16, size);
            }
        }
        Ok(())
    }

    pub fn erase(&self, region: &mut [u8], count: usize, slot: usize) {
        match self {
            KeyList::Fixed { size } => {
                region.copy_within((slot + 1) * size..count * size, slot * size);
            }
            KeyList::Var { .. } => {
                // the heap cell becomes a hole, reclaimed by vacuumize
                region.copy_within(
                    (slot + 1) * VAR_INDEX_ENTRY..count * VAR_INDEX_ENTRY,
                    slot * VAR_INDEX_ENTRY,
                );
            }
        }
    }

    /// In-place compaction: rebuilds the cell heap without holes,
    /// keeping the slot order.
    pub fn vacuumize(&self, region: &mut [u8], count: usize) {
        if let KeyList::Fixed { .. } = self {
            return;
        }

        let cells: Vec<(u16, Vec<u8>)> = (0..count)
            .map(|slot| {
                let (off, size) = var_index(region, slot);
                let len = if size == EXTENDED_MARKER {
                    EXTENDED_CELL_SIZE
                } else {
                    size as usize
                };
                (size, region[off..off + len].to_vec())
            })
            .collect();

        let mut off = region.len();
        for (slot, (size, bytes)) in cells.iter().enumerate() {
            off -= bytes.len();
            region[off..off + bytes.len()].copy_from_slice(bytes);
            set_var_index(region, slot, off as u16, *size);
        }
    }
}

fn var_index(region: &[u8], slot: usize) -> (usize, u16) {
    let base = slot * VAR_INDEX_ENTRY;
    let off = u16::from_le_bytes(region[base..base + 2].try_into().unwrap());
    let size = u16::from_le_bytes(region[base + 2..base + 4].try_into().unwrap());
    (off as usize, size)
}

fn set_var_index(region: &mut [u8], slot: usize, off: u16, size: u16) {
    let base = slot * VAR_INDEX_ENTRY;
    region[base..base + 2].copy_from_slice(&off.to_le_bytes());
    region[base + 2..base + 4].copy_from_slice(&size.to_le_bytes());
}

fn cell_len_at(region: &[u8], slot: usize) -> usize {
    let (_, size) = var_index(region, slot);
    if size == EXTENDED_MARKER {
        EXTENDED_CELL_SIZE
    } else {
        size as usize
    }
}

fn heap_low(region: &[u8], count: usize) -> usize {
    (0..count)
        .map(|slot| var_index(region, slot).0)
        .min()
        .unwrap_or(region.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_list() {
        let list = KeyList::Fixed { size: 4 };
        let mut region = vec![0u8; 64];

        list.insert(&mut region, 0, 0, &KeyCell::Inline(vec![2, 0, 0, 0]))
            .unwrap();
        list.insert(&mut region, 1, 1, &KeyCell::Inline(vec![9, 0, 0, 0]))
            .unwrap();
        list.insert(&mut region, 2, 1, &KeyCell::Inline(vec![5, 0, 0, 0]))
            .unwrap();

        assert_eq!(list.get(&region, 0), KeyCell::Inline(vec![2, 0, 0, 0]));
        assert_eq!(list.get(&region, 1), KeyCell::Inline(vec![5, 0, 0, 0]));
        assert_eq!(list.get(&region, 2), KeyCell::Inline(vec![9, 0, 0, 0]));

        list.erase(&mut region, 3, 1);
        assert_eq!(list.get(&region, 1), KeyCell::Inline(vec![9, 0, 0, 0]));
    }

    #[test]
    fn test_var_list_vacuumize() {
        let list = KeyList::Var { max_inline: 64 };
        let mut region = vec![0u8; 128];

        list.insert(&mut region, 0, 0, &KeyCell::Inline(b"banana".to_vec()))
            .unwrap();
        list.insert(&mut region, 1, 0, &KeyCell::Inline(b"apple".to_vec()))
            .unwrap();
        list.insert(&mut region, 2, 2, &KeyCell::Extended(77))
            .unwrap();

        list.erase(&mut region, 3, 1);
        assert!(list.wasted(&region, 2) > 0);

        list.vacuumize(&mut region, 2);
        assert_eq!(list.wasted(&region, 2), 0);
        assert_eq!(list.get(&region, 0), KeyCell::Inline(b"apple".to_vec()));
        assert_eq!(list.get(&region, 1), KeyCell::Extended(77));
    }

    #[test]
    fn test_var_list_room_check() {
        let list = KeyList::Var { max_inline: 64 };
        let region = vec![0u8; 32];
        // 4 bytes of index plus 28 bytes of cell fits exactly
        assert!(list.has_room(&region, 0, 28));
        assert!(!list.has_room(&region, 0, 29));
    }
}
