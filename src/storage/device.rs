use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
    sync::Mutex,
};

use crate::{error::OakError, types::OakResult, utils::HandyRwLock};

/// Raw byte-granular storage. Both implementations are synchronous;
/// durability is orchestrated by the caller via `flush`.
pub trait Device: Send + Sync {
    fn read(&self, offset: u64, buf: &mut [u8]) -> OakResult;

    fn write(&self, offset: u64, data: &[u8]) -> OakResult;

    /// Appends `len` zeroed bytes and returns their start offset.
    fn alloc(&self, len: u64) -> Result<u64, OakError>;

    fn file_size(&self) -> Result<u64, OakError>;

    fn truncate(&self, new_size: u64) -> OakResult;

    fn flush(&self) -> OakResult;
}

pub struct FileDevice {
    file: Mutex<File>,
    enable_fsync: bool,
}

impl FileDevice {
    pub fn create<P: AsRef<Path>>(path: P, enable_fsync: bool) -> Result<Self, OakError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            enable_fsync,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P, enable_fsync: bool) -> Result<Self, OakError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            enable_fsync,
        })
    }
}

impl Device for FileDevice {
    fn read(&self, offset: u64, buf: &mut [u8]) -> OakResult {
        let mut file = self.file.lock().unwrap();
        let size = file.metadata()?.len();
        if offset + buf.len() as u64 > size {
            return Err(OakError::io(&format!(
                "read past end of file: {} + {} > {}",
                offset,
                buf.len(),
                size
            )));
        }
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write(&self, offset: u64, data: &[u8]) -> OakResult {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn alloc(&self, len: u64) -> Result<u64, OakError> {
        let file = self.file.lock().unwrap();
        let old_size = file.metadata()?.len();
        file.set_len(old_size + len)?;
        Ok(old_size)
    }

    fn file_size(&self) -> Result<u64, OakError> {
        let file = self.file.lock().unwrap();
        Ok(file.metadata()?.len())
    }

    fn truncate(&self, new_size: u64) -> OakResult {
        let file = self.file.lock().unwrap();
        file.set_len(new_size)?;
        Ok(())
    }

    fn flush(&self) -> OakResult {
        let file = self.file.lock().unwrap();
        if self.enable_fsync {
            file.sync_all()?;
        }
        Ok(())
    }
}

/// Heap-backed device for in-memory environments. Addresses are
/// synthetic offsets into one growable buffer.
pub struct MemDevice {
    data: std::sync::RwLock<Vec<u8>>,
}

impl MemDevice {
    pub fn new() -> Self {
        Self {
            data: std::sync::RwLock::new(Vec::new()),
        }
    }
}

impl Device for MemDevice {
    fn read(&self, offset: u64, buf: &mut [u8]) -> OakResult {
        let data = self.data.rl();
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(OakError::io(&format!(
                "read past end of device: {} > {}",
                end,
                data.len()
            )));
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write(&self, offset: u64, bytes: &[u8]) -> OakResult {
        let mut data = self.data.wl();
        let end = offset as usize + bytes.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset as usize..end].copy_from_slice(bytes);
        Ok(())
    }

    fn alloc(&self, len: u64) -> Result<u64, OakError> {
        let mut data = self.data.wl();
        let old_size = data.len() as u64;
        data.resize((old_size + len) as usize, 0);
        Ok(old_size)
    }

    fn file_size(&self) -> Result<u64, OakError> {
        Ok(self.data.rl().len() as u64)
    }

    fn truncate(&self, new_size: u64) -> OakResult {
        self.data.wl().resize(new_size as usize, 0);
        Ok(())
    }

    fn flush(&self) -> OakResult {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_device_round_trip() {
        let device = MemDevice::new();
        let addr = device.alloc(128).unwrap();
        device.write(addr + 10, b"hello").unwrap();

        let mut buf = [0u8; 5];
        device.read(addr + 10, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        assert!(device.read(1024, &mut buf).is_err());
    }

    #[test]
    fn test_file_device_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.db");

        let device = FileDevice::create(&path, false).unwrap();
        let addr = device.alloc(64).unwrap();
        assert_eq!(addr, 0);
        device.write(0, b"abcdef").unwrap();

        let mut buf = [0u8; 6];
        device.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"abcdef");

        // reading past the end of the file fails
        let mut big = [0u8; 128];
        assert!(device.read(0, &mut big).is_err());
    }
}
