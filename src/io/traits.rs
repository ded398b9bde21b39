//! Core I/O traits

use std::io;

/// How a virtual file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing file, reads only
    Read,
    /// Existing file, reads and writes
    ReadWrite,
    /// New or truncated file, reads and writes
    Create,
}

impl OpenMode {
    pub fn is_writable(&self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

/// Positioned byte access to a file-like resource
///
/// All offsets are 64-bit regardless of platform. Implementations must be safe to
/// share across threads; each call is independent of any previous position.
pub trait VirtualFile: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset`, returning how many were
    /// read. Fewer bytes than requested means end of file was reached.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes all of `data` at `offset`, extending the file when needed
    fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Current length in bytes
    fn len(&self) -> io::Result<u64>;

    /// Resizes the file to exactly `len` bytes
    fn truncate(&self, len: u64) -> io::Result<()>;

    /// Pushes buffered writes to the backing store
    fn flush(&self) -> io::Result<()>;
}

pub(crate) fn read_only_error() -> io::Error {
    io::Error::new(io::ErrorKind::PermissionDenied, "file is opened read-only")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_mode_writable() {
        assert!(!OpenMode::Read.is_writable());
        assert!(OpenMode::ReadWrite.is_writable());
        assert!(OpenMode::Create.is_writable());
    }

    #[test]
    fn test_read_only_error_kind() {
        assert_eq!(read_only_error().kind(), io::ErrorKind::PermissionDenied);
    }
}
