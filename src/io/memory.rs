//! In-memory file system backing `/vsimem/` identifiers

use std::io;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use super::traits::{read_only_error, OpenMode, VirtualFile};

type SharedBytes = Arc<RwLock<Vec<u8>>>;

/// Named growable byte buffers. Unlinking a name leaves already-open handles
/// working on the detached buffer.
#[derive(Default)]
pub struct MemFs {
    files: DashMap<String, SharedBytes>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, name: &str, mode: OpenMode) -> io::Result<MemFile> {
        let data = match mode {
            OpenMode::Create => {
                let data: SharedBytes = Arc::new(RwLock::new(Vec::new()));
                self.files.insert(name.to_string(), Arc::clone(&data));
                data
            }
            OpenMode::Read | OpenMode::ReadWrite => self
                .files
                .get(name)
                .map(|entry| Arc::clone(entry.value()))
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, format!("{} not found", name))
                })?,
        };

        Ok(MemFile {
            data,
            writable: mode.is_writable(),
        })
    }

    /// Creates or replaces `name` with `bytes`
    pub fn insert(&self, name: &str, bytes: Vec<u8>) {
        self.files
            .insert(name.to_string(), Arc::new(RwLock::new(bytes)));
    }

    /// Snapshot of the current content of `name`
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files.get(name).map(|entry| entry.value().read().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn remove(&self, name: &str) -> bool {
        self.files.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Handle to one in-memory file
pub struct MemFile {
    data: SharedBytes,
    writable: bool,
}

impl VirtualFile for MemFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.read();
        if offset >= data.len() as u64 {
            return Ok(0);
        }

        let start = offset as usize;
        let end = (start + buf.len()).min(data.len());
        buf[..end - start].copy_from_slice(&data[start..end]);
        Ok(end - start)
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        if !self.writable {
            return Err(read_only_error());
        }

        let too_large = || io::Error::new(io::ErrorKind::InvalidInput, "offset too large");
        let start = usize::try_from(offset).map_err(|_| too_large())?;
        let end = start.checked_add(bytes.len()).ok_or_else(too_large)?;

        let mut data = self.data.write();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        if !self.writable {
            return Err(read_only_error());
        }
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length too large"))?;
        self.data.write().resize(len, 0);
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_read_back() {
        let fs = MemFs::new();
        let file = fs.open("/vsimem/a", OpenMode::Create).unwrap();
        file.write_at(0, b"hello").unwrap();

        let again = fs.open("/vsimem/a", OpenMode::Read).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(again.read_at(0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_missing_file() {
        let fs = MemFs::new();
        let err = fs.open("/vsimem/none", OpenMode::Read).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_sparse_write_extends() {
        let fs = MemFs::new();
        let file = fs.open("x", OpenMode::Create).unwrap();
        file.write_at(3, &[1]).unwrap();
        assert_eq!(fs.get("x").unwrap(), vec![0, 0, 0, 1]);
    }

    #[test]
    fn test_write_past_address_space() {
        let fs = MemFs::new();
        let file = fs.open("w", OpenMode::Create).unwrap();
        let err = file.write_at(u64::MAX - 1, &[1, 2, 3]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(file.len().unwrap(), 0);
    }

    #[test]
    fn test_read_only_handle() {
        let fs = MemFs::new();
        fs.insert("y", vec![1, 2, 3]);
        let file = fs.open("y", OpenMode::Read).unwrap();
        assert!(file.write_at(0, &[0]).is_err());
    }

    #[test]
    fn test_unlink_keeps_open_handles() {
        let fs = MemFs::new();
        fs.insert("z", vec![4, 5]);
        let file = fs.open("z", OpenMode::ReadWrite).unwrap();
        assert!(fs.remove("z"));
        assert!(!fs.contains("z"));

        let mut buf = [0u8; 2];
        assert_eq!(file.read_at(0, &mut buf).unwrap(), 2);
        assert_eq!(buf, [4, 5]);
    }

    #[test]
    fn test_truncate() {
        let fs = MemFs::new();
        fs.insert("t", vec![1, 2, 3, 4]);
        let file = fs.open("t", OpenMode::ReadWrite).unwrap();
        file.truncate(1).unwrap();
        assert_eq!(file.len().unwrap(), 1);
    }
}
