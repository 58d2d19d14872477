use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};

use crate::error::{ErrorCode, OakError};

/// The compression algorithm applied to journal payloads and records.
/// The numeric value is persisted in the environment header and in the
/// database descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionKind {
    None = 0,
    Zlib = 1,
}

impl CompressionKind {
    pub fn from_u32(value: u32) -> Option<CompressionKind> {
        match value {
            0 => Some(CompressionKind::None),
            1 => Some(CompressionKind::Zlib),
            _ => None,
        }
    }

    pub fn to_u32(&self) -> u32 {
        *self as u32
    }

    pub fn is_enabled(&self) -> bool {
        *self != CompressionKind::None
    }
}

pub fn compress(kind: CompressionKind, data: &[u8]) -> Result<Vec<u8>, OakError> {
    match kind {
        CompressionKind::None => Ok(data.to_vec()),
        CompressionKind::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
    }
}

/// A decompression failure means the stored bytes no longer match what
/// was written and is reported as a corruption error.
pub fn decompress(
    kind: CompressionKind,
    data: &[u8],
    expected_size: usize,
) -> Result<Vec<u8>, OakError> {
    match kind {
        CompressionKind::None => Ok(data.to_vec()),
        CompressionKind::Zlib => {
            let mut decoder = ZlibDecoder::new(data);
            let mut out = Vec::with_capacity(expected_size);
            decoder.read_to_end(&mut out).or_else(|e| {
                Err(OakError::new(
                    ErrorCode::IntegrityViolated,
                    &format!("record decompression failed: {}", e),
                ))
            })?;
            if out.len() != expected_size {
                return Err(OakError::integrity(&format!(
                    "decompressed size mismatch: {} != {}",
                    out.len(),
                    expected_size
                )));
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let data: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();
        let packed = compress(CompressionKind::Zlib, &data).unwrap();
        assert!(packed.len() < data.len());
        let unpacked = decompress(CompressionKind::Zlib, &packed, data.len()).unwrap();
        assert_eq!(unpacked, data);
    }

    #[test]
    fn test_garbage_is_corruption() {
        let garbage = vec![0x42u8; 64];
        let result = decompress(CompressionKind::Zlib, &garbage, 100);
        assert_eq!(
            result.unwrap_err().code(),
            ErrorCode::IntegrityViolated
        );
    }
}
