//! Core data types for blockraster

use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents pixel data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Unsigned 8-bit integer
    U8,
    /// Unsigned 16-bit integer
    U16,
    /// Unsigned 32-bit integer
    U32,
    /// Signed 8-bit integer
    I8,
    /// Signed 16-bit integer
    I16,
    /// Signed 32-bit integer
    I32,
    /// 32-bit floating point
    F32,
    /// 64-bit floating point
    F64,
}

impl DataType {
    /// All supported data types
    pub const ALL: [DataType; 8] = [
        DataType::U8,
        DataType::I8,
        DataType::U16,
        DataType::I16,
        DataType::U32,
        DataType::I32,
        DataType::F32,
        DataType::F64,
    ];

    /// Returns the size in bytes for this data type
    pub fn size(&self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::U32 | DataType::I32 | DataType::F32 => 4,
            DataType::F64 => 8,
        }
    }

    /// Returns the name of this data type
    pub fn name(&self) -> &'static str {
        match self {
            DataType::U8 => "U8",
            DataType::U16 => "U16",
            DataType::U32 => "U32",
            DataType::I8 => "I8",
            DataType::I16 => "I16",
            DataType::I32 => "I32",
            DataType::F32 => "F32",
            DataType::F64 => "F64",
        }
    }

    /// Parses a data type name as produced by [`DataType::name`] (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|dt| dt.name().eq_ignore_ascii_case(name))
    }

    /// Stable one-byte code used by on-disk headers
    pub fn code(&self) -> u8 {
        match self {
            DataType::U8 => 1,
            DataType::U16 => 2,
            DataType::I16 => 3,
            DataType::U32 => 4,
            DataType::I32 => 5,
            DataType::F32 => 6,
            DataType::F64 => 7,
            DataType::I8 => 8,
        }
    }

    /// Inverse of [`DataType::code`]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|dt| dt.code() == code)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    pub fn is_integer(&self) -> bool {
        !self.is_float()
    }

    pub fn is_signed(&self) -> bool {
        !matches!(self, DataType::U8 | DataType::U16 | DataType::U32)
    }

    /// Smallest representable value
    pub fn min_value(&self) -> f64 {
        match self {
            DataType::U8 | DataType::U16 | DataType::U32 => 0.0,
            DataType::I8 => i8::MIN as f64,
            DataType::I16 => i16::MIN as f64,
            DataType::I32 => i32::MIN as f64,
            DataType::F32 => f32::MIN as f64,
            DataType::F64 => f64::MIN,
        }
    }

    /// Largest representable value
    pub fn max_value(&self) -> f64 {
        match self {
            DataType::U8 => u8::MAX as f64,
            DataType::U16 => u16::MAX as f64,
            DataType::U32 => u32::MAX as f64,
            DataType::I8 => i8::MAX as f64,
            DataType::I16 => i16::MAX as f64,
            DataType::I32 => i32::MAX as f64,
            DataType::F32 => f32::MAX as f64,
            DataType::F64 => f64::MAX,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Represents raster dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    /// Width in pixels
    pub width: usize,
    /// Height in pixels
    pub height: usize,
}

impl Dimensions {
    /// Creates new dimensions
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Returns the total number of pixels
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

/// A pixel window. The origin may be negative or lie past the raster edge; only the
/// part intersecting the raster touches real data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub x: i64,
    pub y: i64,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn new(x: i64, y: i64, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Intersection with a `raster_width` x `raster_height` extent, as
    /// `(x, y, width, height)` in raster coordinates.
    pub fn clip(&self, raster_width: usize, raster_height: usize) -> Option<(usize, usize, usize, usize)> {
        let x0 = self.x.max(0);
        let y0 = self.y.max(0);
        let x1 = self.x.saturating_add(self.width as i64).min(raster_width as i64);
        let y1 = self.y.saturating_add(self.height as i64).min(raster_height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as usize, y0 as usize, (x1 - x0) as usize, (y1 - y0) as usize))
    }

    /// Whether the window lies entirely inside the extent
    pub fn is_inside(&self, raster_width: usize, raster_height: usize) -> bool {
        self.x >= 0
            && self.y >= 0
            && self.x.saturating_add(self.width as i64) <= raster_width as i64
            && self.y.saturating_add(self.height as i64) <= raster_height as i64
    }
}

/// How a dataset was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    ReadOnly,
    Update,
}

impl AccessMode {
    pub fn is_writable(&self) -> bool {
        matches!(self, AccessMode::Update)
    }
}

/// Color / interpretation tag of a band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorInterp {
    #[default]
    Undefined,
    Gray,
    Palette,
    Red,
    Green,
    Blue,
    Alpha,
}

impl ColorInterp {
    pub fn code(&self) -> u8 {
        match self {
            ColorInterp::Undefined => 0,
            ColorInterp::Gray => 1,
            ColorInterp::Palette => 2,
            ColorInterp::Red => 3,
            ColorInterp::Green => 4,
            ColorInterp::Blue => 5,
            ColorInterp::Alpha => 6,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => ColorInterp::Gray,
            2 => ColorInterp::Palette,
            3 => ColorInterp::Red,
            4 => ColorInterp::Green,
            5 => ColorInterp::Blue,
            6 => ColorInterp::Alpha,
            _ => ColorInterp::Undefined,
        }
    }
}

/// Affine pixel-to-georeferenced transform `[a, b, c, d, e, f]` where
///
/// geo_x = a + b * pixel_x + c * pixel_y
/// geo_y = d + e * pixel_x + f * pixel_y
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// North-up transform from an origin and pixel size
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        GeoTransform([origin_x, pixel_width, 0.0, origin_y, 0.0, -pixel_height.abs()])
    }

    pub fn coefficients(&self) -> [f64; 6] {
        self.0
    }

    /// Converts pixel coordinates to georeferenced coordinates
    pub fn pixel_to_geo(&self, pixel_x: f64, pixel_y: f64) -> (f64, f64) {
        let t = &self.0;
        (
            t[0] + t[1] * pixel_x + t[2] * pixel_y,
            t[3] + t[4] * pixel_x + t[5] * pixel_y,
        )
    }

    /// Converts georeferenced coordinates to pixel coordinates, `None` when the
    /// transform is not invertible
    pub fn geo_to_pixel(&self, geo_x: f64, geo_y: f64) -> Option<(f64, f64)> {
        let t = &self.0;
        let det = t[1] * t[5] - t[2] * t[4];
        if det.abs() < 1e-15 {
            return None;
        }

        let dx = geo_x - t[0];
        let dy = geo_y - t[3];
        Some((
            (t[5] * dx - t[2] * dy) / det,
            (t[1] * dy - t[4] * dx) / det,
        ))
    }

    /// Transform of a raster reduced by `factor_x` / `factor_y`
    pub fn scaled(&self, factor_x: f64, factor_y: f64) -> Self {
        let t = self.0;
        GeoTransform([
            t[0],
            t[1] * factor_x,
            t[2] * factor_y,
            t[3],
            t[4] * factor_x,
            t[5] * factor_y,
        ])
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        GeoTransform([0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
    }
}
