//! Fixed header shared by the flat and tiled grid formats
//!
//! ```text
//! offset  size  field
//!      0     4  magic
//!      4     1  version (1)
//!      5     1  byte order marker, `I` or `M`
//!      6     1  data type code
//!      7     1  flags: bit 0 no-data set, bit 1 geotransform set
//!      8    20  width, height, band count, block width, block height (u32)
//!     28     1  format specific (tiled: compression code)
//!     32     8  no-data value (f64)
//!     40    48  geotransform (6 x f64)
//!     88     4  CRS length in bytes
//!     92     8  format specific offset (flat: pixel data, tiled: tile index)
//!    128     -  CRS text, UTF-8, inside a reserved area
//! ```
//!
//! Multi-byte fields use the byte order given by the marker.

use crate::driver::{BandLayout, DatasetLayout};
use crate::error::{Error, Result};
use crate::io::{ByteOrder, VfsHandle};
use crate::types::{DataType, GeoTransform};

pub const HEADER_LEN: usize = 128;

/// Space reserved for the CRS text in newly created files
pub const CRS_CAPACITY: usize = 512;

const VERSION: u8 = 1;
const FLAG_NO_DATA: u8 = 0x01;
const FLAG_GEO_TRANSFORM: u8 = 0x02;

#[derive(Debug, Clone, PartialEq)]
pub struct GridHeader {
    pub byte_order: ByteOrder,
    pub data_type: DataType,
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub block_width: usize,
    pub block_height: usize,
    pub aux: u8,
    pub no_data: Option<f64>,
    pub geo_transform: Option<GeoTransform>,
    pub crs: Option<String>,
    pub offset: u64,
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::InvalidArgument(format!("{} {} exceeds 32 bits", what, value)))
}

impl GridHeader {
    /// Serialised header plus CRS text
    pub fn encode(&self, magic: &[u8; 4]) -> Result<Vec<u8>> {
        let crs = self.crs.as_deref().unwrap_or("").as_bytes();
        let bo = self.byte_order;
        let mut out = vec![0u8; HEADER_LEN];

        out[0..4].copy_from_slice(magic);
        out[4] = VERSION;
        out[5] = bo.marker();
        out[6] = self.data_type.code();
        let mut flags = 0;
        if self.no_data.is_some() {
            flags |= FLAG_NO_DATA;
        }
        if self.geo_transform.is_some() {
            flags |= FLAG_GEO_TRANSFORM;
        }
        out[7] = flags;

        for (i, (value, what)) in [
            (self.width, "width"),
            (self.height, "height"),
            (self.bands, "band count"),
            (self.block_width, "block width"),
            (self.block_height, "block height"),
        ]
        .into_iter()
        .enumerate()
        {
            bo.write_u32(&mut out[8 + i * 4..], to_u32(value, what)?);
        }

        out[28] = self.aux;
        bo.write_f64(&mut out[32..], self.no_data.unwrap_or(0.0));
        let gt = self.geo_transform.map_or([0.0; 6], |g| g.0);
        for (i, v) in gt.iter().enumerate() {
            bo.write_f64(&mut out[40 + i * 8..], *v);
        }
        bo.write_u32(&mut out[88..], to_u32(crs.len(), "CRS length")?);
        bo.write_u64(&mut out[92..], self.offset);

        out.extend_from_slice(crs);
        Ok(out)
    }

    /// Reads and validates the header of an open file
    pub fn read(handle: &VfsHandle, magic: &[u8; 4]) -> Result<Self> {
        let path = handle.identifier();
        let mut raw = vec![0u8; HEADER_LEN];
        handle
            .read_exact_at(0, &mut raw)
            .map_err(|_| Error::malformed(path, "truncated header"))?;

        if &raw[0..4] != magic {
            return Err(Error::malformed(path, "bad magic number"));
        }
        if raw[4] != VERSION {
            return Err(Error::malformed(path, format!("unsupported version {}", raw[4])));
        }
        let bo = ByteOrder::from_marker(raw[5])
            .ok_or_else(|| Error::malformed(path, format!("bad byte order marker 0x{:02x}", raw[5])))?;
        let data_type = DataType::from_code(raw[6])
            .ok_or_else(|| Error::malformed(path, format!("unknown data type code {}", raw[6])))?;
        let flags = raw[7];

        let field = |i: usize| bo.read_u32(&raw[8 + i * 4..]) as usize;
        let mut gt = [0f64; 6];
        for (i, v) in gt.iter_mut().enumerate() {
            *v = bo.read_f64(&raw[40 + i * 8..]);
        }

        let crs_len = bo.read_u32(&raw[88..]) as usize;
        if crs_len as u64 > handle.len()?.saturating_sub(HEADER_LEN as u64) {
            return Err(Error::malformed(path, format!("CRS length {} exceeds the file", crs_len)));
        }
        let crs = if crs_len == 0 {
            None
        } else {
            let mut text = vec![0u8; crs_len];
            handle
                .read_exact_at(HEADER_LEN as u64, &mut text)
                .map_err(|_| Error::malformed(path, "truncated CRS"))?;
            Some(String::from_utf8(text).map_err(|_| Error::malformed(path, "CRS is not UTF-8"))?)
        };

        Ok(Self {
            byte_order: bo,
            data_type,
            width: field(0),
            height: field(1),
            bands: field(2),
            block_width: field(3),
            block_height: field(4),
            aux: raw[28],
            no_data: (flags & FLAG_NO_DATA != 0).then(|| bo.read_f64(&raw[32..])),
            geo_transform: (flags & FLAG_GEO_TRANSFORM != 0).then_some(GeoTransform(gt)),
            crs,
            offset: bo.read_u64(&raw[92..]),
        })
    }

    pub fn write(&self, handle: &VfsHandle, magic: &[u8; 4]) -> Result<()> {
        handle.write_at(0, &self.encode(magic)?)
    }

    pub fn to_layout(&self) -> DatasetLayout {
        let band = BandLayout::new(self.data_type, self.block_width, self.block_height)
            .with_no_data(self.no_data);
        let mut layout = DatasetLayout::new(self.width, self.height, vec![band; self.bands]);
        layout.metadata.geo_transform = self.geo_transform;
        layout.metadata.crs = self.crs.clone();
        layout
    }

    /// Takes over the persistable metadata of `layout`. The format holds one
    /// no-data value, taken from the first band.
    pub fn apply_metadata(&mut self, layout: &DatasetLayout) {
        self.no_data = layout.bands.first().and_then(|b| b.no_data);
        self.geo_transform = layout.metadata.geo_transform;
        self.crs = layout.metadata.crs.clone();
    }

    /// Bytes available for CRS text before `data_start`
    pub fn check_crs_fits(&self, path: &str, data_start: u64) -> Result<()> {
        let len = self.crs.as_ref().map_or(0, |c| c.len()) as u64;
        if HEADER_LEN as u64 + len > data_start {
            return Err(Error::Unsupported(format!(
                "CRS of {} bytes does not fit the header area of '{}'",
                len, path
            )));
        }
        Ok(())
    }
}
