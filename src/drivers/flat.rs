//! FlatGrid: uncompressed band-sequential rasters
//!
//! A [`GridHeader`] followed by pixel data starting at the header's offset. Each
//! band is stored as `height` rows of `width` samples; bands follow each other.
//! Block boundaries are a property of the layout only, so any block size maps
//! onto the same file.

use parking_lot::Mutex;
use tracing::debug;

use crate::driver::{
    CreateSpec, DatasetLayout, DetectionPriority, Driver, OpenContext, Probe, RasterSource,
};
use crate::error::{Error, Result};
use crate::io::{ByteOrder, OpenMode, VfsHandle};
use crate::types::{AccessMode, DataType};

use super::header::{GridHeader, CRS_CAPACITY, HEADER_LEN};

pub const DRIVER_NAME: &str = "FlatGrid";
pub const MAGIC: &[u8; 4] = b"FGRD";

/// Default block edge for new files
const DEFAULT_BLOCK: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct FlatGridDriver {
    byte_order: ByteOrder,
}

impl Default for FlatGridDriver {
    fn default() -> Self {
        Self {
            byte_order: ByteOrder::LittleEndian,
        }
    }
}

impl FlatGridDriver {
    /// Driver writing new files in `byte_order`. Existing files are read in
    /// whatever order their header declares.
    pub fn with_byte_order(byte_order: ByteOrder) -> Self {
        Self { byte_order }
    }
}

/// Single data type shared by all bands of `spec`
pub(crate) fn uniform_data_type(spec: &CreateSpec, format: &str) -> Result<DataType> {
    let first = spec.bands[0].data_type;
    if spec.bands.iter().any(|b| b.data_type != first) {
        return Err(Error::Unsupported(format!(
            "{} stores one data type for all bands",
            format
        )));
    }
    Ok(first)
}

/// Block size of new files; one size for all bands
pub(crate) fn uniform_block_size(spec: &CreateSpec, default_edge: usize) -> (usize, usize) {
    let (bw, bh) = spec.bands[0]
        .block_size
        .unwrap_or((default_edge, default_edge));
    (bw.min(spec.width).max(1), bh.min(spec.height).max(1))
}

impl Driver for FlatGridDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn description(&self) -> &str {
        "Uncompressed band-sequential grid"
    }

    fn extensions(&self) -> &[&str] {
        &["fgd"]
    }

    fn priority(&self) -> DetectionPriority {
        DetectionPriority::Signature
    }

    fn identify(&self, probe: &Probe) -> bool {
        probe.starts_with(MAGIC)
    }

    fn open(&self, ctx: &OpenContext<'_>, probe: &Probe, mode: AccessMode) -> Result<Box<dyn RasterSource>> {
        let file_mode = if mode.is_writable() {
            OpenMode::ReadWrite
        } else {
            OpenMode::Read
        };
        let handle = ctx.vfs().open(&probe.identifier, file_mode)?;
        let header = GridHeader::read(&handle, MAGIC)?;
        Ok(Box::new(FlatSource::new(handle, header)?))
    }

    fn can_create(&self) -> bool {
        true
    }

    fn create(&self, ctx: &OpenContext<'_>, path: &str, spec: &CreateSpec) -> Result<Box<dyn RasterSource>> {
        let data_type = uniform_data_type(spec, DRIVER_NAME)?;
        let (block_width, block_height) = uniform_block_size(spec, DEFAULT_BLOCK);

        let header = GridHeader {
            byte_order: self.byte_order,
            data_type,
            width: spec.width,
            height: spec.height,
            bands: spec.bands.len(),
            block_width,
            block_height,
            aux: 0,
            no_data: spec.bands[0].no_data,
            geo_transform: spec.geo_transform,
            crs: spec.crs.clone(),
            offset: (HEADER_LEN + CRS_CAPACITY) as u64,
        };
        header.check_crs_fits(path, header.offset)?;

        let handle = ctx.vfs().open(path, OpenMode::Create)?;
        header.write(&handle, MAGIC)?;
        let size = data_size(&header)
            .and_then(|n| n.checked_add(header.offset))
            .ok_or_else(|| Error::InvalidArgument(format!("'{}' is too large", path)))?;
        handle.truncate(size)?;
        debug!(path, size, "created flat grid");

        FlatSource::new(handle, header).map(|s| Box::new(s) as Box<dyn RasterSource>)
    }
}

/// Pixel payload size, or `None` when it does not fit in 64 bits
fn data_size(header: &GridHeader) -> Option<u64> {
    [header.height, header.bands, header.data_type.size()]
        .into_iter()
        .try_fold(header.width as u64, |acc, n| acc.checked_mul(n as u64))
}

pub struct FlatSource {
    handle: VfsHandle,
    layout: DatasetLayout,
    header: Mutex<GridHeader>,
    byte_order: ByteOrder,
    sample_size: usize,
    data_offset: u64,
}

impl FlatSource {
    fn new(handle: VfsHandle, header: GridHeader) -> Result<Self> {
        let path = handle.identifier().to_string();
        let crs_len = header.crs.as_ref().map_or(0, |c| c.len()) as u64;
        if header.offset < HEADER_LEN as u64 + crs_len {
            return Err(Error::malformed(&path, "pixel data overlaps the header"));
        }
        let expected = data_size(&header)
            .and_then(|n| n.checked_add(header.offset))
            .ok_or_else(|| Error::malformed(&path, "pixel data size overflows"))?;
        let actual = handle.len()?;
        if actual < expected {
            return Err(Error::malformed(
                &path,
                format!("truncated: {} bytes, expected {}", actual, expected),
            ));
        }

        Ok(Self {
            layout: header.to_layout(),
            byte_order: header.byte_order,
            sample_size: header.data_type.size(),
            data_offset: header.offset,
            header: Mutex::new(header),
            handle,
        })
    }

    fn sample_offset(&self, band: usize, x: usize, y: usize) -> u64 {
        let (w, h) = (self.layout.width as u64, self.layout.height as u64);
        let index = ((band as u64 - 1) * h + y as u64) * w + x as u64;
        self.data_offset + index * self.sample_size as u64
    }

    /// Origin and valid extent of a block, after checking its address
    fn block_rows(&self, band: usize, block_x: usize, block_y: usize) -> Result<(usize, usize, usize, usize)> {
        let band_layout = self.layout.band(band).ok_or(Error::BandOutOfRange {
            index: band,
            count: self.layout.bands.len(),
        })?;
        let x0 = block_x * band_layout.block_width;
        let y0 = block_y * band_layout.block_height;
        if x0 >= self.layout.width || y0 >= self.layout.height {
            return Err(Error::InvalidArgument(format!(
                "block ({}, {}) outside the raster",
                block_x, block_y
            )));
        }
        let cols = band_layout.block_width.min(self.layout.width - x0);
        let rows = band_layout.block_height.min(self.layout.height - y0);
        Ok((x0, y0, cols, rows))
    }
}

impl RasterSource for FlatSource {
    fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    fn read_block(&self, band: usize, block_x: usize, block_y: usize, buf: &mut [u8]) -> Result<()> {
        let (x0, y0, cols, rows) = self.block_rows(band, block_x, block_y)?;
        let stride = self.layout.bands[band - 1].block_width * self.sample_size;
        let row_bytes = cols * self.sample_size;

        for r in 0..rows {
            let dst = &mut buf[r * stride..r * stride + row_bytes];
            self.handle.read_exact_at(self.sample_offset(band, x0, y0 + r), dst)?;
            self.byte_order.swap_to_native(self.sample_size, dst);
        }
        Ok(())
    }

    fn write_block(&self, band: usize, block_x: usize, block_y: usize, data: &[u8]) -> Result<()> {
        let (x0, y0, cols, rows) = self.block_rows(band, block_x, block_y)?;
        let stride = self.layout.bands[band - 1].block_width * self.sample_size;
        let row_bytes = cols * self.sample_size;

        let mut row = vec![0u8; row_bytes];
        for r in 0..rows {
            row.copy_from_slice(&data[r * stride..r * stride + row_bytes]);
            self.byte_order.swap_to_native(self.sample_size, &mut row);
            self.handle.write_at(self.sample_offset(band, x0, y0 + r), &row)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.handle.flush()
    }

    fn write_metadata(&self, layout: &DatasetLayout) -> Result<()> {
        let mut header = self.header.lock();
        let mut updated = header.clone();
        updated.apply_metadata(layout);
        updated.check_crs_fits(self.handle.identifier(), self.data_offset)?;
        updated.write(&self.handle, MAGIC)?;
        *header = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverRegistry;
    use crate::types::{GeoTransform, Window};

    fn registry() -> DriverRegistry {
        DriverRegistry::with_builtin_drivers(Default::default())
    }

    #[test]
    fn test_identify_by_magic() {
        let driver = FlatGridDriver::default();
        assert!(driver.identify(&Probe::new("a.bin", b"FGRD\x01".to_vec())));
        assert!(!driver.identify(&Probe::new("a.fgd", b"TGRD\x01".to_vec())));
    }

    #[test]
    fn test_create_write_reopen() {
        let registry = registry();
        let path = "/vsimem/flat/roundtrip.fgd";
        let spec = CreateSpec::new(5, 3, 2, DataType::U16)
            .with_block_size(2, 2)
            .with_no_data(7.0)
            .with_geo_transform(GeoTransform::north_up(1.0, 2.0, 0.5, 0.5));

        let values: Vec<u16> = (0..15).map(|v| v * 1000).collect();
        {
            let ds = registry.create(path, DRIVER_NAME, &spec).unwrap();
            ds.band(2).unwrap().write_window(Window::new(0, 0, 5, 3), &values).unwrap();
            ds.close().unwrap();
        }

        let ds = registry.open(path, AccessMode::ReadOnly).unwrap();
        assert_eq!(ds.driver_name(), DRIVER_NAME);
        assert_eq!(ds.raster_size(), (5, 3));
        assert_eq!(ds.band(1).unwrap().block_size(), (2, 2));
        assert_eq!(ds.band(1).unwrap().no_data_value(), Some(7.0));
        assert_eq!(ds.geo_transform(), spec.geo_transform);

        let back = ds.band(2).unwrap().read_as::<u16>(Window::new(0, 0, 5, 3)).unwrap();
        assert_eq!(back.data, values);
        // Never written: zero on disk
        let first = ds.band(1).unwrap().read_as::<u16>(Window::new(0, 0, 5, 3)).unwrap();
        assert!(first.data.iter().all(|v| *v == 0));
    }

    #[test]
    fn test_big_endian_file() {
        let vfs = crate::io::Vfs::default();
        let registry = DriverRegistry::builder()
            .vfs(vfs.clone())
            .register(FlatGridDriver::with_byte_order(ByteOrder::BigEndian))
            .build();
        let path = "/vsimem/flat/be.fgd";
        let ds = registry
            .create(path, DRIVER_NAME, &CreateSpec::new(2, 1, 1, DataType::I32))
            .unwrap();
        ds.band(1).unwrap().write_window(Window::new(0, 0, 2, 1), &[1i32, -2]).unwrap();
        ds.close().unwrap();

        let bytes = vfs.read_mem_file(path).unwrap();
        let start = HEADER_LEN + CRS_CAPACITY;
        assert_eq!(bytes[5], b'M');
        assert_eq!(&bytes[start..start + 4], &[0, 0, 0, 1]);

        let ds = registry.open(path, AccessMode::ReadOnly).unwrap();
        let back = ds.band(1).unwrap().read_as::<i32>(Window::new(0, 0, 2, 1)).unwrap();
        assert_eq!(back.data, vec![1, -2]);
    }

    #[test]
    fn test_metadata_rewritten_on_flush() {
        let registry = registry();
        let path = "/vsimem/flat/meta.fgd";
        let ds = registry
            .create(path, DRIVER_NAME, &CreateSpec::new(4, 4, 1, DataType::F32))
            .unwrap();
        ds.set_crs("EPSG:4326").unwrap();
        ds.band(1).unwrap().set_no_data_value(Some(-1.0)).unwrap();
        ds.close().unwrap();

        let ds = registry.open(path, AccessMode::ReadOnly).unwrap();
        assert_eq!(ds.crs().as_deref(), Some("EPSG:4326"));
        assert_eq!(ds.band(1).unwrap().no_data_value(), Some(-1.0));
    }

    #[test]
    fn test_oversized_crs_rejected() {
        let registry = registry();
        let spec = CreateSpec::new(2, 2, 1, DataType::U8).with_crs("x".repeat(CRS_CAPACITY + 1));
        assert!(matches!(
            registry.create("/vsimem/flat/crs.fgd", DRIVER_NAME, &spec),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_mixed_types_rejected() {
        let registry = registry();
        let mut spec = CreateSpec::new(2, 2, 2, DataType::U8);
        spec.bands[1].data_type = DataType::F32;
        assert!(matches!(
            registry.create("/vsimem/flat/mixed.fgd", DRIVER_NAME, &spec),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_truncated_file_is_malformed() {
        let registry = registry();
        let path = "/vsimem/flat/short.fgd";
        registry
            .create(path, DRIVER_NAME, &CreateSpec::new(8, 8, 1, DataType::U8))
            .unwrap()
            .close()
            .unwrap();

        let mut bytes = registry.vfs().read_mem_file(path).unwrap();
        bytes.truncate(bytes.len() - 1);
        registry.vfs().write_mem_file(path, bytes).unwrap();

        assert!(matches!(
            registry.open(path, AccessMode::ReadOnly),
            Err(Error::MalformedSource { .. })
        ));
    }

    /// Overwrites little endian u32 header fields of a 4x4 file
    fn patched(registry: &DriverRegistry, path: &str, fields: &[(usize, u32)]) {
        registry
            .create(path, DRIVER_NAME, &CreateSpec::new(4, 4, 1, DataType::U8))
            .unwrap()
            .close()
            .unwrap();
        let mut bytes = registry.vfs().read_mem_file(path).unwrap();
        for &(offset, value) in fields {
            bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
        registry.vfs().write_mem_file(path, bytes).unwrap();
    }

    #[test]
    fn test_overflowing_dimensions_are_malformed() {
        let registry = registry();
        let path = "/vsimem/flat/huge.fgd";
        patched(&registry, path, &[(8, u32::MAX), (12, u32::MAX), (16, u32::MAX)]);
        assert!(matches!(
            registry.open(path, AccessMode::ReadOnly),
            Err(Error::MalformedSource { .. })
        ));
    }

    #[test]
    fn test_oversized_block_is_malformed() {
        let registry = registry();
        let path = "/vsimem/flat/block.fgd";
        patched(&registry, path, &[(20, u32::MAX), (24, u32::MAX)]);
        assert!(matches!(
            registry.open(path, AccessMode::ReadOnly),
            Err(Error::MalformedSource { .. })
        ));
    }

    #[test]
    fn test_crs_length_past_end_is_malformed() {
        let registry = registry();
        let path = "/vsimem/flat/crs_len.fgd";
        patched(&registry, path, &[(88, u32::MAX)]);
        assert!(matches!(
            registry.open(path, AccessMode::ReadOnly),
            Err(Error::MalformedSource { .. })
        ));
    }
}
