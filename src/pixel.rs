//! Pixel sample types and numeric conversion between them
//!
//! Cached block buffers hold samples of the band's native [`DataType`] in native
//! byte order. Callers read and write through any [`PixelType`]; the conversion
//! clamps out-of-range values to the target range instead of wrapping.

use crate::types::DataType;

/// Type-level binding between a Rust primitive and a band [`DataType`].
pub trait PixelType: Copy + Default + Send + Sync + PartialEq + std::fmt::Debug + 'static {
    const DATA_TYPE: DataType;

    /// Lossless widening to `f64`
    fn to_f64(self) -> f64;

    /// Narrowing from `f64`: rounds integers half away from zero and clamps to the
    /// representable range; NaN becomes zero for integer targets.
    fn from_f64(value: f64) -> Self;

    /// Decodes one sample from native-order bytes
    fn read_ne(bytes: &[u8]) -> Self;

    /// Encodes one sample into native-order bytes
    fn write_ne(self, out: &mut [u8]);
}

macro_rules! impl_integer_pixel {
    ($t:ty, $dt:expr) => {
        impl PixelType for $t {
            const DATA_TYPE: DataType = $dt;

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(value: f64) -> Self {
                if value.is_nan() {
                    return 0;
                }
                value.round().clamp(<$t>::MIN as f64, <$t>::MAX as f64) as $t
            }

            fn read_ne(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&bytes[..std::mem::size_of::<$t>()]);
                <$t>::from_ne_bytes(raw)
            }

            fn write_ne(self, out: &mut [u8]) {
                out[..std::mem::size_of::<$t>()].copy_from_slice(&self.to_ne_bytes());
            }
        }
    };
}

impl_integer_pixel!(u8, DataType::U8);
impl_integer_pixel!(i8, DataType::I8);
impl_integer_pixel!(u16, DataType::U16);
impl_integer_pixel!(i16, DataType::I16);
impl_integer_pixel!(u32, DataType::U32);
impl_integer_pixel!(i32, DataType::I32);

impl PixelType for f32 {
    const DATA_TYPE: DataType = DataType::F32;

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        if value.is_finite() {
            value.clamp(f32::MIN as f64, f32::MAX as f64) as f32
        } else {
            value as f32
        }
    }

    fn read_ne(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[..4]);
        f32::from_ne_bytes(raw)
    }

    fn write_ne(self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.to_ne_bytes());
    }
}

impl PixelType for f64 {
    const DATA_TYPE: DataType = DataType::F64;

    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(value: f64) -> Self {
        value
    }

    fn read_ne(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        f64::from_ne_bytes(raw)
    }

    fn write_ne(self, out: &mut [u8]) {
        out[..8].copy_from_slice(&self.to_ne_bytes());
    }
}

/// Reads sample `index` of a native-order buffer of `data_type` as `f64`
pub fn read_sample(data_type: DataType, bytes: &[u8], index: usize) -> f64 {
    let at = &bytes[index * data_type.size()..];
    match data_type {
        DataType::U8 => u8::read_ne(at).to_f64(),
        DataType::I8 => i8::read_ne(at).to_f64(),
        DataType::U16 => u16::read_ne(at).to_f64(),
        DataType::I16 => i16::read_ne(at).to_f64(),
        DataType::U32 => u32::read_ne(at).to_f64(),
        DataType::I32 => i32::read_ne(at).to_f64(),
        DataType::F32 => f32::read_ne(at).to_f64(),
        DataType::F64 => f64::read_ne(at),
    }
}

/// Writes `value` as sample `index` of a native-order buffer, clamping to `data_type`
pub fn write_sample(data_type: DataType, bytes: &mut [u8], index: usize, value: f64) {
    let at = &mut bytes[index * data_type.size()..];
    match data_type {
        DataType::U8 => u8::from_f64(value).write_ne(at),
        DataType::I8 => i8::from_f64(value).write_ne(at),
        DataType::U16 => u16::from_f64(value).write_ne(at),
        DataType::I16 => i16::from_f64(value).write_ne(at),
        DataType::U32 => u32::from_f64(value).write_ne(at),
        DataType::I32 => i32::from_f64(value).write_ne(at),
        DataType::F32 => f32::from_f64(value).write_ne(at),
        DataType::F64 => value.write_ne(at),
    }
}

/// The value `value` takes once stored as `data_type`
pub fn clamp_to(data_type: DataType, value: f64) -> f64 {
    let mut scratch = [0u8; 8];
    write_sample(data_type, &mut scratch, 0, value);
    read_sample(data_type, &scratch, 0)
}

/// Fills a native-order buffer with `value` converted to `data_type`
pub fn fill_bytes(data_type: DataType, bytes: &mut [u8], value: f64) {
    let size = data_type.size();
    if value == 0.0 {
        bytes.fill(0);
        return;
    }

    let mut pattern = [0u8; 8];
    write_sample(data_type, &mut pattern, 0, value);
    for chunk in bytes.chunks_exact_mut(size) {
        chunk.copy_from_slice(&pattern[..size]);
    }
}

/// Copies `count` samples from a native buffer of `src_type` into a typed slice
pub fn copy_to_typed<T: PixelType>(
    src_type: DataType,
    src: &[u8],
    src_index: usize,
    dst: &mut [T],
    dst_index: usize,
    count: usize,
) {
    let size = src_type.size();
    let dst = &mut dst[dst_index..dst_index + count];
    if src_type == T::DATA_TYPE {
        let src = &src[src_index * size..(src_index + count) * size];
        for (out, raw) in dst.iter_mut().zip(src.chunks_exact(size)) {
            *out = T::read_ne(raw);
        }
    } else {
        for (i, out) in dst.iter_mut().enumerate() {
            *out = T::from_f64(read_sample(src_type, src, src_index + i));
        }
    }
}

/// Copies `count` samples from a typed slice into a native buffer of `dst_type`
pub fn copy_from_typed<T: PixelType>(
    src: &[T],
    src_index: usize,
    dst_type: DataType,
    dst: &mut [u8],
    dst_index: usize,
    count: usize,
) {
    let size = dst_type.size();
    let src = &src[src_index..src_index + count];
    if dst_type == T::DATA_TYPE {
        let dst = &mut dst[dst_index * size..(dst_index + count) * size];
        for (value, raw) in src.iter().zip(dst.chunks_exact_mut(size)) {
            value.write_ne(raw);
        }
    } else {
        for (i, value) in src.iter().enumerate() {
            write_sample(dst_type, dst, dst_index + i, value.to_f64());
        }
    }
}

/// A 2-D window of samples: `size` is `(cols, rows)` and `data` is row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer<T> {
    pub size: (usize, usize),
    pub data: Vec<T>,
}

impl<T: PixelType> Buffer<T> {
    /// Construct a new buffer from `size` (`(cols, rows)`) and `Vec<T>`.
    ///
    /// # Panic
    /// Will panic if `size.0 * size.1 != data.len()`.
    pub fn new(size: (usize, usize), data: Vec<T>) -> Self {
        assert_eq!(
            size.0 * size.1,
            data.len(),
            "size {:?} does not match length {}",
            size,
            data.len()
        );
        Buffer { size, data }
    }

    /// Zero-initialised buffer
    pub fn zeroed(size: (usize, usize)) -> Self {
        Buffer {
            size,
            data: vec![T::default(); size.0 * size.1],
        }
    }

    /// Sample at column `x`, row `y`
    pub fn get(&self, x: usize, y: usize) -> Option<T> {
        if x >= self.size.0 || y >= self.size.1 {
            return None;
        }
        self.data.get(y * self.size.0 + x).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_clamping() {
        assert_eq!(u8::from_f64(300.0), 255);
        assert_eq!(u8::from_f64(-5.0), 0);
        assert_eq!(i8::from_f64(-200.0), -128);
        assert_eq!(i16::from_f64(1e9), i16::MAX);
        assert_eq!(u32::from_f64(-1.0), 0);
        assert_eq!(u16::from_f64(f64::NAN), 0);
    }

    #[test]
    fn test_integer_rounding() {
        assert_eq!(u8::from_f64(2.5), 3);
        assert_eq!(u8::from_f64(2.4), 2);
        assert_eq!(i16::from_f64(-2.5), -3);
    }

    #[test]
    fn test_float_clamping() {
        assert_eq!(f32::from_f64(1e300), f32::MAX);
        assert_eq!(f32::from_f64(-1e300), f32::MIN);
        assert!(f32::from_f64(f64::INFINITY).is_infinite());
        assert!(f32::from_f64(f64::NAN).is_nan());
    }

    #[test]
    fn test_sample_access() {
        let mut buf = vec![0u8; 4 * DataType::I16.size()];
        write_sample(DataType::I16, &mut buf, 2, -1234.0);
        assert_eq!(read_sample(DataType::I16, &buf, 2), -1234.0);
        assert_eq!(read_sample(DataType::I16, &buf, 1), 0.0);

        write_sample(DataType::I16, &mut buf, 3, 99999.0);
        assert_eq!(read_sample(DataType::I16, &buf, 3), 32767.0);
    }

    #[test]
    fn test_clamp_to() {
        assert_eq!(clamp_to(DataType::U8, 256.0), 255.0);
        assert_eq!(clamp_to(DataType::F64, 0.1), 0.1);
        assert_eq!(clamp_to(DataType::F32, 0.5), 0.5);
    }

    #[test]
    fn test_fill_bytes() {
        let mut buf = vec![0u8; 3 * 4];
        fill_bytes(DataType::F32, &mut buf, 1.5);
        for i in 0..3 {
            assert_eq!(read_sample(DataType::F32, &buf, i), 1.5);
        }
    }

    #[test]
    fn test_copy_same_type() {
        let values: Vec<u16> = vec![1, 2, 65535];
        let mut native = vec![0u8; 6];
        copy_from_typed(&values, 0, DataType::U16, &mut native, 0, 3);

        let mut back = vec![0u16; 3];
        copy_to_typed(DataType::U16, &native, 0, &mut back, 0, 3);
        assert_eq!(back, values);
    }

    #[test]
    fn test_copy_with_conversion() {
        let values: Vec<f64> = vec![-1.0, 127.6, 1000.0];
        let mut native = vec![0u8; 3];
        copy_from_typed(&values, 0, DataType::U8, &mut native, 0, 3);
        assert_eq!(native, vec![0, 128, 255]);

        let mut back = vec![0i32; 3];
        copy_to_typed(DataType::U8, &native, 0, &mut back, 0, 3);
        assert_eq!(back, vec![0, 128, 255]);
    }

    #[test]
    fn test_copy_offsets() {
        let native: Vec<u8> = (0..10).collect();
        let mut out = vec![0f32; 5];
        copy_to_typed(DataType::U8, &native, 4, &mut out, 1, 3);
        assert_eq!(out, vec![0.0, 4.0, 5.0, 6.0, 0.0]);
    }

    #[test]
    fn test_buffer() {
        let b = Buffer::new((2, 3), vec![1u8, 2, 3, 4, 5, 6]);
        assert_eq!(b.get(1, 2), Some(6));
        assert_eq!(b.get(2, 0), None);

        let z: Buffer<f32> = Buffer::zeroed((4, 4));
        assert_eq!(z.data.len(), 16);
    }

    #[test]
    #[should_panic]
    fn test_buffer_size_mismatch() {
        let _ = Buffer::new((2, 2), vec![1u8, 2, 3]);
    }
}
