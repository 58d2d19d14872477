use std::{
    convert::TryInto,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    mem::size_of,
    path::{Path, PathBuf},
};

use crate::{error::OakError, types::OakResult};

pub trait Encodeable {
    fn encode(&self) -> Vec<u8>;
}

pub trait Decodeable: Sized {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, OakError>;
}

pub fn read_exact<R: Read>(reader: &mut R, bytes_count: usize) -> Result<Vec<u8>, OakError> {
    let mut buffer = vec![0u8; bytes_count];
    reader
        .read_exact(&mut buffer)
        .or_else(|_| Err(OakError::io(&format!("short read, expect {}", bytes_count))))?;
    Ok(buffer)
}

/// An append buffer for building on-disk structures. All multi-byte
/// integers are little-endian.
pub struct OakWriter {
    buf: Vec<u8>,
}

impl OakWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write<T: Encodeable>(&mut self, obj: &T) {
        self.buf.extend_from_slice(obj.encode().as_slice());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Patch previously written bytes in place.
    pub fn overwrite(&mut self, position: usize, bytes: &[u8]) {
        self.buf[position..position + bytes.len()].copy_from_slice(bytes);
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn truncate(&mut self, size: usize) {
        self.buf.truncate(size);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.buf.clone()
    }
}

/// A positioned file handle used by the journal and by file devices.
pub struct OakFile {
    file: File,
    path: PathBuf,
}

impl OakFile {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, OakError> {
        let file = OpenOptions::new()
            .write(true)
            .read(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, OakError> {
        let file = OpenOptions::new().write(true).read(true).open(&path)?;
        Ok(Self {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read<T: Decodeable>(&mut self) -> Result<T, OakError> {
        T::decode_from(&mut self.file)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, OakError> {
        read_exact(&mut self.file, count)
    }

    pub fn write<T: Encodeable>(&mut self, obj: &T) -> OakResult {
        self.write_bytes(&obj.encode())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> OakResult {
        self.file.write_all(bytes)?;
        Ok(())
    }

    pub fn seek(&mut self, position: u64) -> OakResult {
        self.file.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    pub fn seek_end(&mut self) -> Result<u64, OakError> {
        Ok(self.file.seek(SeekFrom::End(0))?)
    }

    pub fn position(&mut self) -> Result<u64, OakError> {
        Ok(self.file.seek(SeekFrom::Current(0))?)
    }

    pub fn size(&self) -> Result<u64, OakError> {
        Ok(self.file.metadata()?.len())
    }

    pub fn truncate(&mut self, size: u64) -> OakResult {
        self.file.set_len(size)?;
        // after truncate, the file cursor may be far beyond the new end of
        // file; reset it, or the next write resizes the file again
        self.seek(size)?;
        Ok(())
    }

    pub fn flush(&mut self) -> OakResult {
        self.file.flush()?;
        Ok(())
    }

    pub fn sync(&mut self) -> OakResult {
        self.file.sync_all()?;
        Ok(())
    }
}

/// # Format
///
/// - 1 byte (0 for false, 1 for true)
impl Encodeable for bool {
    fn encode(&self) -> Vec<u8> {
        vec![*self as u8]
    }
}

impl Decodeable for bool {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, OakError> {
        Ok(u8::decode_from(reader)? == 1)
    }
}

impl Encodeable for &[u8] {
    fn encode(&self) -> Vec<u8> {
        self.to_vec()
    }
}

macro_rules! impl_serialization {
    (for $($t:ty),+) => {
        $(
            impl Encodeable for $t {
                fn encode(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }

            impl Decodeable for $t {
                fn decode_from<R: Read>(reader: &mut R) -> Result<Self, OakError> {
                    let bytes = read_exact(reader, size_of::<Self>())?;
                    Ok(Self::from_le_bytes(bytes.try_into().unwrap()))
                }
            }
        )*
    }
}

impl_serialization!(for u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_integers() {
        let mut writer = OakWriter::new();
        writer.write(&42u16);
        writer.write(&7u64);
        writer.write(&true);

        let bytes = writer.to_bytes();
        let mut reader = std::io::Cursor::new(bytes);
        assert_eq!(u16::decode_from(&mut reader).unwrap(), 42);
        assert_eq!(u64::decode_from(&mut reader).unwrap(), 7);
        assert_eq!(bool::decode_from(&mut reader).unwrap(), true);
    }

    #[test]
    fn test_short_read_is_an_error() {
        let mut reader = std::io::Cursor::new(vec![1u8, 2]);
        assert!(u64::decode_from(&mut reader).is_err());
    }
}
