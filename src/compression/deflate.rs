//! Deflate (zlib) tile codec

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::error::Result;

/// Compresses a tile with the default level
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompresses a tile; `size_hint` pre-sizes the output
pub fn decompress(data: &[u8], size_hint: usize) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::with_capacity(size_hint);
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deflate_round_trip() {
        let original: Vec<u8> = (0..4096u32).map(|v| (v % 17) as u8).collect();
        let compressed = compress(&original).unwrap();
        assert!(compressed.len() < original.len());
        assert_eq!(decompress(&compressed, original.len()).unwrap(), original);
    }

    #[test]
    fn test_corrupt_stream() {
        assert!(decompress(&[0x78, 0x9c, 0xff, 0xff], 16).is_err());
    }
}
