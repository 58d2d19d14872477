use std::convert::TryInto;

use crate::error::OakError;

/// cell width of the default (flag byte + 8 payload bytes) layout
pub const DEFAULT_CELL_SIZE: usize = 9;

/// payload bytes available for an inline record
pub const INLINE_RECORD_MAX: usize = 8;

const CELL_EMPTY: u8 = 0x00;
const CELL_BLOB: u8 = 0x01;
const CELL_DUPTABLE: u8 = 0x02;
const CELL_INLINE: u8 = 0x40; // low nibble carries the length

/// How one slot stores its record(s): a few bytes directly in the
/// leaf, a blob reference, or a reference to a duplicate table.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordRef {
    Inline(Vec<u8>),
    Blob(u64),
    DupTable(u64),
}

/// Per-slot record storage. `Fixed` keeps the raw record bytes in the
/// node (also used by internal nodes, whose "records" are 8-byte child
/// addresses); `Default` keeps a 9-byte cell per slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordList {
    Fixed { size: usize },
    Default,
}

impl RecordList {
    pub fn cell_size(&self) -> usize {
        match self {
            RecordList::Fixed { size } => *size,
            RecordList::Default => DEFAULT_CELL_SIZE,
        }
    }
}

pub fn encode_cell(record: &RecordRef) -> [u8; DEFAULT_CELL_SIZE] {
    let mut cell = [0u8; DEFAULT_CELL_SIZE];
    match record {
        RecordRef::Inline(bytes) => {
            assert!(bytes.len() <= INLINE_RECORD_MAX);
            cell[0] = CELL_INLINE | bytes.len() as u8;
            cell[1..1 + bytes.len()].copy_from_slice(bytes);
        }
        RecordRef::Blob(id) => {
            cell[0] = CELL_BLOB;
            cell[1..9].copy_from_slice(&id.to_le_bytes());
        }
        RecordRef::DupTable(id) => {
            cell[0] = CELL_DUPTABLE;
            cell[1..9].copy_from_slice(&id.to_le_bytes());
        }
    }
    cell
}

pub fn decode_cell(cell: &[u8]) -> Result<RecordRef, OakError> {
    let flag = cell[0];
    if flag & CELL_INLINE != 0 {
        let len = (flag & 0x0F) as usize;
        if len > INLINE_RECORD_MAX {
            return Err(OakError::integrity("corrupt inline record cell"));
        }
        return Ok(RecordRef::Inline(cell[1..1 + len].to_vec()));
    }
    let id = u64::from_le_bytes(cell[1..9].try_into().unwrap());
    match flag {
        CELL_BLOB => Ok(RecordRef::Blob(id)),
        CELL_DUPTABLE => Ok(RecordRef::DupTable(id)),
        CELL_EMPTY => Ok(RecordRef::Inline(Vec::new())),
        _ => Err(OakError::integrity("unknown record cell flag")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_round_trip() {
        for record in [
            RecordRef::Inline(b"abc".to_vec()),
            RecordRef::Inline(Vec::new()),
            RecordRef::Blob(0xDEAD_BEEF),
            RecordRef::DupTable(42),
        ]
        .iter()
        {
            let cell = encode_cell(record);
            assert_eq!(&decode_cell(&cell).unwrap(), record);
        }
    }
}
