//! Identifier dispatch for virtual files
//!
//! - `/vsimem/<name>`: in-memory file
//! - `/vsisubfile/<offset>_<length>,<identifier>`: window into another file
//! - anything else: local path

use std::io;
use std::sync::Arc;

use tracing::trace;

use crate::config::VfsConfig;
use crate::error::{Error, Result};

use super::local::{LocalFile, MmapFile};
use super::memory::MemFs;
use super::subfile::{self, SubFile};
use super::traits::{OpenMode, VirtualFile};

pub const MEM_PREFIX: &str = "/vsimem/";
pub const SUBFILE_PREFIX: &str = "/vsisubfile/";

/// Opens virtual files by identifier. Clones share the same in-memory file system.
#[derive(Clone)]
pub struct Vfs {
    mem: Arc<MemFs>,
    config: VfsConfig,
}

impl Vfs {
    pub fn new(config: VfsConfig) -> Self {
        Self {
            mem: Arc::new(MemFs::new()),
            config,
        }
    }

    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    /// Opens `identifier`. The returned handle releases the underlying resource
    /// when dropped.
    pub fn open(&self, identifier: &str, mode: OpenMode) -> Result<VfsHandle> {
        let file = self
            .open_raw(identifier, mode)
            .map_err(|e| Error::io_at(identifier, 0, e))?;

        trace!(identifier, ?mode, "opened virtual file");
        Ok(VfsHandle {
            file,
            identifier: identifier.to_string(),
            mode,
        })
    }

    fn open_raw(&self, identifier: &str, mode: OpenMode) -> io::Result<Box<dyn VirtualFile>> {
        if identifier.starts_with(MEM_PREFIX) {
            return Ok(Box::new(self.mem.open(identifier, mode)?));
        }

        if let Some(spec) = identifier.strip_prefix(SUBFILE_PREFIX) {
            let (offset, length, inner) = subfile::parse_spec(spec).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("malformed sub-file identifier '{}'", identifier),
                )
            })?;
            if mode == OpenMode::Create {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "sub-file windows cannot be created",
                ));
            }
            let inner = self.open_raw(inner, mode)?;
            return Ok(Box::new(SubFile::new(inner, offset, length)));
        }

        if mode == OpenMode::Read && self.config.use_mmap {
            if let Some(mapped) = MmapFile::open(identifier)? {
                return Ok(Box::new(mapped));
            }
        }

        Ok(Box::new(LocalFile::open(identifier, mode)?))
    }

    /// Reads at most `len` bytes from the head of `identifier`
    pub fn read_prefix(&self, identifier: &str, len: usize) -> Result<Vec<u8>> {
        let handle = self.open(identifier, OpenMode::Read)?;
        handle.read_at(0, len)
    }

    pub fn exists(&self, identifier: &str) -> bool {
        if identifier.starts_with(MEM_PREFIX) {
            return self.mem.contains(identifier);
        }
        if identifier.starts_with(SUBFILE_PREFIX) {
            return self.open_raw(identifier, OpenMode::Read).is_ok();
        }
        std::path::Path::new(identifier).is_file()
    }

    /// Removes `identifier`
    pub fn unlink(&self, identifier: &str) -> Result<()> {
        if identifier.starts_with(MEM_PREFIX) {
            if self.mem.remove(identifier) {
                return Ok(());
            }
            return Err(Error::io_at(
                identifier,
                0,
                io::Error::new(io::ErrorKind::NotFound, "no such in-memory file"),
            ));
        }
        std::fs::remove_file(identifier).map_err(|e| Error::io_at(identifier, 0, e))
    }

    /// Creates or replaces the in-memory file `identifier` (must start with `/vsimem/`)
    pub fn write_mem_file(&self, identifier: &str, bytes: Vec<u8>) -> Result<()> {
        if !identifier.starts_with(MEM_PREFIX) {
            return Err(Error::InvalidArgument(format!(
                "'{}' is not an in-memory identifier",
                identifier
            )));
        }
        self.mem.insert(identifier, bytes);
        Ok(())
    }

    /// Content of the in-memory file `identifier`
    pub fn read_mem_file(&self, identifier: &str) -> Option<Vec<u8>> {
        self.mem.get(identifier)
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new(VfsConfig::default())
    }
}

/// A scoped open virtual file
pub struct VfsHandle {
    file: Box<dyn VirtualFile>,
    identifier: String,
    mode: OpenMode,
}

impl VfsHandle {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Reads up to `len` bytes at `offset`. A shorter result means end of file.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let n = self
            .file
            .read_at(offset, &mut buf)
            .map_err(|e| Error::io_at(&self.identifier, offset, e))?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Fills `buf` from `offset` or fails with [`Error::ShortRead`]
    pub fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let n = self
            .file
            .read_at(offset, buf)
            .map_err(|e| Error::io_at(&self.identifier, offset, e))?;
        if n < buf.len() {
            return Err(Error::ShortRead {
                path: self.identifier.clone(),
                offset,
                requested: buf.len(),
                got: n,
            });
        }
        Ok(())
    }

    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        if !self.mode.is_writable() {
            return Err(Error::ReadOnly(self.identifier.clone()));
        }
        self.file
            .write_at(offset, data)
            .map_err(|e| Error::io_at(&self.identifier, offset, e))
    }

    pub fn len(&self) -> Result<u64> {
        self.file
            .len()
            .map_err(|e| Error::io_at(&self.identifier, 0, e))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn truncate(&self, len: u64) -> Result<()> {
        if !self.mode.is_writable() {
            return Err(Error::ReadOnly(self.identifier.clone()));
        }
        self.file
            .truncate(len)
            .map_err(|e| Error::io_at(&self.identifier, len, e))
    }

    pub fn flush(&self) -> Result<()> {
        self.file
            .flush()
            .map_err(|e| Error::io_at(&self.identifier, 0, e))
    }
}

impl Drop for VfsHandle {
    fn drop(&mut self) {
        trace!(identifier = %self.identifier, "closing virtual file");
    }
}
