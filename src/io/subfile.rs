//! A byte window inside another virtual file

use std::io;

use super::traits::VirtualFile;

/// Exposes `[start, start + length)` of `inner` as a file of its own.
/// A `length` of `None` extends the window to the end of `inner`.
pub struct SubFile {
    inner: Box<dyn VirtualFile>,
    start: u64,
    length: Option<u64>,
}

impl SubFile {
    pub fn new(inner: Box<dyn VirtualFile>, start: u64, length: Option<u64>) -> Self {
        Self { inner, start, length }
    }

    fn window_len(&self) -> io::Result<u64> {
        let available = self.inner.len()?.saturating_sub(self.start);
        Ok(match self.length {
            Some(len) => len.min(available),
            None => available,
        })
    }
}

/// Parses `<offset>_<length>,<path>` or `<offset>,<path>`
pub fn parse_spec(spec: &str) -> Option<(u64, Option<u64>, &str)> {
    let (range, path) = spec.split_once(',')?;
    if path.is_empty() {
        return None;
    }

    match range.split_once('_') {
        Some((offset, length)) => {
            let offset = offset.parse().ok()?;
            let length: u64 = length.parse().ok()?;
            Some((offset, (length > 0).then_some(length), path))
        }
        None => Some((range.parse().ok()?, None, path)),
    }
}

impl VirtualFile for SubFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.window_len()?;
        if offset >= len {
            return Ok(0);
        }

        let n = ((len - offset) as usize).min(buf.len());
        self.inner.read_at(self.start + offset, &mut buf[..n])
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        if let Some(len) = self.length {
            if offset + data.len() as u64 > len {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "write past the end of a sub-file window",
                ));
            }
        }
        self.inner.write_at(self.start + offset, data)
    }

    fn len(&self) -> io::Result<u64> {
        self.window_len()
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        match self.length {
            Some(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "cannot resize a fixed sub-file window",
            )),
            None => self.inner.truncate(self.start + len),
        }
    }

    fn flush(&self) -> io::Result<()> {
        self.inner.flush()
    }
}
