//! Local file backends: plain positioned I/O and read-only memory mapping

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use memmap2::Mmap;
use parking_lot::Mutex;

use super::traits::{read_only_error, OpenMode, VirtualFile};

/// A local file. Seek-then-read pairs are serialised by a mutex so the handle
/// can be shared between threads.
pub struct LocalFile {
    file: Mutex<File>,
    writable: bool,
}

impl LocalFile {
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> io::Result<Self> {
        let file = match mode {
            OpenMode::Read => File::open(path)?,
            OpenMode::ReadWrite => OpenOptions::new().read(true).write(true).open(path)?,
            OpenMode::Create => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?,
        };

        Ok(Self {
            file: Mutex::new(file),
            writable: mode.is_writable(),
        })
    }
}

impl VirtualFile for LocalFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        if !self.writable {
            return Err(read_only_error());
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        if !self.writable {
            return Err(read_only_error());
        }
        self.file.lock().set_len(len)
    }

    fn flush(&self) -> io::Result<()> {
        let mut file = self.file.lock();
        file.flush()?;
        if self.writable {
            file.sync_data()?;
        }
        Ok(())
    }
}

/// A read-only memory-mapped local file
pub struct MmapFile {
    mmap: Mmap,
}

impl MmapFile {
    /// Maps `path`. Empty files cannot be mapped on every platform, so callers
    /// fall back to [`LocalFile`] when this returns `Ok(None)`.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Option<Self>> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(None);
        }

        // Safety: the mapping is only ever read; concurrent truncation of the file by
        // another process is outside what this backend guards against.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Some(Self { mmap }))
    }
}

impl VirtualFile for MmapFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.mmap.len() as u64;
        if offset >= len {
            return Ok(0);
        }

        let start = offset as usize;
        let end = (start + buf.len()).min(self.mmap.len());
        let n = end - start;
        buf[..n].copy_from_slice(&self.mmap[start..end]);
        Ok(n)
    }

    fn write_at(&self, _offset: u64, _data: &[u8]) -> io::Result<()> {
        Err(read_only_error())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.mmap.len() as u64)
    }

    fn truncate(&self, _len: u64) -> io::Result<()> {
        Err(read_only_error())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn temp_with(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_local_read_at() {
        let tmp = temp_with(&[0x10, 0x20, 0x30, 0x40]);
        let file = LocalFile::open(tmp.path(), OpenMode::Read).unwrap();

        let mut buf = [0u8; 2];
        assert_eq!(file.read_at(2, &mut buf).unwrap(), 2);
        assert_eq!(buf, [0x30, 0x40]);
        assert_eq!(file.len().unwrap(), 4);
    }

    #[test]
    fn test_local_short_read() {
        let tmp = temp_with(&[1, 2, 3]);
        let file = LocalFile::open(tmp.path(), OpenMode::Read).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(1, &mut buf).unwrap(), 2);
        assert_eq!(file.read_at(10, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_local_read_only_rejects_writes() {
        let tmp = temp_with(&[1, 2, 3]);
        let file = LocalFile::open(tmp.path(), OpenMode::Read).unwrap();
        assert!(file.write_at(0, &[9]).is_err());
        assert!(file.truncate(0).is_err());
    }

    #[test]
    fn test_local_create_write_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.bin");

        let file = LocalFile::open(&path, OpenMode::Create).unwrap();
        file.write_at(4, &[7, 8]).unwrap();
        assert_eq!(file.len().unwrap(), 6);

        let mut buf = [0xFFu8; 6];
        file.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0, 0, 7, 8]);

        file.truncate(2).unwrap();
        file.flush().unwrap();
        assert_eq!(file.len().unwrap(), 2);
    }

    #[test]
    fn test_mmap_read() {
        let tmp = temp_with(&[5, 6, 7, 8, 9]);
        let file = MmapFile::open(tmp.path()).unwrap().unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(file.read_at(3, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[8, 9]);
        assert!(file.write_at(0, &[1]).is_err());
    }

    #[test]
    fn test_mmap_empty_file() {
        let tmp = temp_with(&[]);
        assert!(MmapFile::open(tmp.path()).unwrap().is_none());
    }
}
