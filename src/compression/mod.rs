//! Tile compression

pub mod deflate;

use crate::error::{Error, Result};

/// Codec applied to stored tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Stored as-is
    None,
    /// zlib-wrapped deflate
    #[default]
    Deflate,
}

impl Compression {
    /// Decodes the one-byte code stored in file headers
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Deflate),
            _ => Err(Error::Unsupported(format!("compression code {}", code))),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Deflate => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Compression::None => "None",
            Compression::Deflate => "Deflate",
        }
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Deflate => deflate::compress(data),
        }
    }

    /// Decodes a tile that must expand to exactly `expected_len` bytes
    pub fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let decoded = match self {
            Compression::None => data.to_vec(),
            Compression::Deflate => deflate::decompress(data, expected_len)?,
        };
        if decoded.len() != expected_len {
            return Err(Error::InvalidArgument(format!(
                "{} tile decoded to {} bytes, expected {}",
                self.name(),
                decoded.len(),
                expected_len
            )));
        }
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_codes() {
        assert_eq!(Compression::from_code(0).unwrap(), Compression::None);
        assert_eq!(Compression::from_code(1).unwrap(), Compression::Deflate);
        assert!(Compression::from_code(9).is_err());
        assert_eq!(Compression::Deflate.code(), 1);
    }

    #[test]
    fn test_no_compression() {
        let data = vec![1u8, 2, 3, 4];
        assert_eq!(Compression::None.compress(&data).unwrap(), data);
        assert_eq!(Compression::None.decompress(&data, 4).unwrap(), data);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let packed = Compression::Deflate.compress(&[7u8; 10]).unwrap();
        assert!(Compression::Deflate.decompress(&packed, 12).is_err());
    }
}
