//! Byte order (endianness) handling
//!
//! File formats store multi-byte values in a fixed byte order while cached blocks
//! hold samples in native order. Drivers use these helpers to convert whole sample
//! buffers in place and to read or write scalar header fields.

/// Represents the byte order (endianness) of binary data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian byte order (least significant byte first)
    LittleEndian,
    /// Big-endian byte order (most significant byte first)
    BigEndian,
}

impl ByteOrder {
    /// Byte order of the running platform
    pub fn native() -> Self {
        if cfg!(target_endian = "little") {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        }
    }

    /// Detects byte order from a one-byte marker: `I` (Intel, little-endian) or
    /// `M` (Motorola, big-endian)
    pub fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            b'I' => Some(ByteOrder::LittleEndian),
            b'M' => Some(ByteOrder::BigEndian),
            _ => None,
        }
    }

    /// Inverse of [`ByteOrder::from_marker`]
    pub fn marker(&self) -> u8 {
        match self {
            ByteOrder::LittleEndian => b'I',
            ByteOrder::BigEndian => b'M',
        }
    }

    pub fn is_native(&self) -> bool {
        *self == Self::native()
    }

    /// Converts a buffer of `sample_size`-byte samples between this order and
    /// native order. The conversion is its own inverse.
    pub fn swap_to_native(&self, sample_size: usize, buf: &mut [u8]) {
        if self.is_native() || sample_size <= 1 {
            return;
        }
        for sample in buf.chunks_exact_mut(sample_size) {
            sample.reverse();
        }
    }

    /// Reads an unsigned 32-bit integer from the start of `bytes`
    pub fn read_u32(&self, bytes: &[u8]) -> u32 {
        let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
        match self {
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
        }
    }

    /// Reads an unsigned 64-bit integer from the start of `bytes`
    pub fn read_u64(&self, bytes: &[u8]) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        match self {
            ByteOrder::LittleEndian => u64::from_le_bytes(raw),
            ByteOrder::BigEndian => u64::from_be_bytes(raw),
        }
    }

    /// Reads a 64-bit floating point number from the start of `bytes`
    pub fn read_f64(&self, bytes: &[u8]) -> f64 {
        f64::from_bits(self.read_u64(bytes))
    }

    pub fn write_u32(&self, out: &mut [u8], value: u32) {
        let raw = match self {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        };
        out[..4].copy_from_slice(&raw);
    }

    pub fn write_u64(&self, out: &mut [u8], value: u64) {
        let raw = match self {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        };
        out[..8].copy_from_slice(&raw);
    }

    pub fn write_f64(&self, out: &mut [u8], value: f64) {
        self.write_u64(out, value.to_bits());
    }
}
