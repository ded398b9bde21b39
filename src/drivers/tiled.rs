//! TiledGrid: compressed tiles with an offset index
//!
//! A [`GridHeader`] whose format-specific byte holds the compression code and
//! whose offset points at the tile index. The index has one `(offset: u64,
//! size: u32)` entry per band and tile, band-major then row-major. Tiles are full
//! block buffers in the header's byte order, compressed on their own.
//!
//! Tiles and indexes are appended; superseded copies are not reclaimed. A zero
//! offset marks a tile that was never written and reads as the fill value.

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::compression::Compression;
use crate::driver::{
    CreateSpec, DatasetLayout, DetectionPriority, Driver, OpenContext, Probe, RasterSource,
};
use crate::error::{Error, Result};
use crate::io::{ByteOrder, OpenMode, VfsHandle};
use crate::types::AccessMode;

use super::flat::{uniform_block_size, uniform_data_type};
use super::header::{GridHeader, CRS_CAPACITY, HEADER_LEN};

pub const DRIVER_NAME: &str = "TiledGrid";
pub const MAGIC: &[u8; 4] = b"TGRD";

const DEFAULT_TILE: usize = 256;
const INDEX_ENTRY_LEN: usize = 12;

#[derive(Debug, Clone, Copy)]
pub struct TiledGridDriver {
    compression: Compression,
    byte_order: ByteOrder,
}

impl Default for TiledGridDriver {
    fn default() -> Self {
        Self {
            compression: Compression::Deflate,
            byte_order: ByteOrder::LittleEndian,
        }
    }
}

impl TiledGridDriver {
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }
}

impl Driver for TiledGridDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn description(&self) -> &str {
        "Tiled grid with per-tile compression"
    }

    fn extensions(&self) -> &[&str] {
        &["tgd"]
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
        Ok(Box::new(TiledSource::open(handle, header)?))
    }

    fn can_create(&self) -> bool {
        true
    }

    fn create(&self, ctx: &OpenContext<'_>, path: &str, spec: &CreateSpec) -> Result<Box<dyn RasterSource>> {
        let data_type = uniform_data_type(spec, DRIVER_NAME)?;
        let (block_width, block_height) = uniform_block_size(spec, DEFAULT_TILE);

        let header = GridHeader {
            byte_order: self.byte_order,
            data_type,
            width: spec.width,
            height: spec.height,
            bands: spec.bands.len(),
            block_width,
            block_height,
            aux: self.compression.code(),
            no_data: spec.bands[0].no_data,
            geo_transform: spec.geo_transform,
            crs: spec.crs.clone(),
            offset: 0,
        };
        let tiles_start = (HEADER_LEN + CRS_CAPACITY) as u64;
        header.check_crs_fits(path, tiles_start)?;

        let handle = ctx.vfs().open(path, OpenMode::Create)?;
        let source = TiledSource::new(handle, header, self.compression, TileIndex::empty(tiles_start));
        source.sync_index()?;
        debug!(path, compression = self.compression.name(), "created tiled grid");
        Ok(Box::new(source))
    }
}

struct TileIndex {
    entries: Vec<(u64, u32)>,
    /// Append position for the next tile or index
    end: u64,
    dirty: bool,
}

impl TileIndex {
    /// Index of a new file; entries are sized by [`TiledSource::new`]
    fn empty(end: u64) -> Self {
        Self {
            entries: Vec::new(),
            end,
            dirty: true,
        }
    }

    fn encode(&self, byte_order: ByteOrder) -> Vec<u8> {
        let mut out = vec![0u8; self.entries.len() * INDEX_ENTRY_LEN];
        for (chunk, (offset, size)) in out.chunks_exact_mut(INDEX_ENTRY_LEN).zip(&self.entries) {
            byte_order.write_u64(&mut chunk[..8], *offset);
            byte_order.write_u32(&mut chunk[8..], *size);
        }
        out
    }
}

pub struct TiledSource {
    handle: VfsHandle,
    layout: DatasetLayout,
    header: Mutex<GridHeader>,
    index: Mutex<TileIndex>,
    compression: Compression,
    byte_order: ByteOrder,
    sample_size: usize,
    tiles_x: usize,
    tiles_y: usize,
}

impl TiledSource {
    fn new(handle: VfsHandle, header: GridHeader, compression: Compression, mut index: TileIndex) -> Self {
        let layout = header.to_layout();
        let (tiles_x, tiles_y) = layout.bands[0].block_grid(layout.width, layout.height);
        if index.entries.is_empty() {
            index.entries = vec![(0, 0); tiles_x * tiles_y * layout.bands.len()];
        }
        Self {
            handle,
            compression,
            byte_order: header.byte_order,
            sample_size: header.data_type.size(),
            header: Mutex::new(header),
            index: Mutex::new(index),
            layout,
            tiles_x,
            tiles_y,
        }
    }

    fn open(handle: VfsHandle, header: GridHeader) -> Result<Self> {
        let path = handle.identifier().to_string();
        let compression = Compression::from_code(header.aux)
            .map_err(|_| Error::malformed(&path, format!("unknown compression code {}", header.aux)))?;
        if header.offset == 0 || header.bands == 0 || header.block_width == 0 || header.block_height == 0 {
            return Err(Error::malformed(&path, "missing tile index"));
        }

        let file_len = handle.len()?;
        let tiles_x = header.width.div_ceil(header.block_width);
        let tiles_y = header.height.div_ceil(header.block_height);
        let index_len = tiles_x
            .checked_mul(tiles_y)
            .and_then(|n| n.checked_mul(header.bands))
            .and_then(|n| n.checked_mul(INDEX_ENTRY_LEN))
            .filter(|n| {
                header
                    .offset
                    .checked_add(*n as u64)
                    .is_some_and(|end| end <= file_len)
            })
            .ok_or_else(|| Error::malformed(&path, "tile index does not fit the file"))?;

        let mut raw = vec![0u8; index_len];
        handle
            .read_exact_at(header.offset, &mut raw)
            .map_err(|_| Error::malformed(&path, "truncated tile index"))?;

        let bo = header.byte_order;
        let entries: Vec<(u64, u32)> = raw
            .chunks_exact(INDEX_ENTRY_LEN)
            .map(|c| (bo.read_u64(&c[..8]), bo.read_u32(&c[8..])))
            .collect();
        if let Some((offset, size)) = entries
            .iter()
            .find(|(offset, size)| {
                *offset != 0 && offset.checked_add(*size as u64).is_none_or(|end| end > file_len)
            })
        {
            return Err(Error::malformed(
                &path,
                format!("tile at {} ({} bytes) extends past end of file", offset, size),
            ));
        }

        let index = TileIndex {
            entries,
            end: file_len,
            dirty: false,
        };
        Ok(Self::new(handle, header, compression, index))
    }

    fn entry_index(&self, band: usize, block_x: usize, block_y: usize) -> Result<usize> {
        if band == 0 || band > self.layout.bands.len() {
            return Err(Error::BandOutOfRange {
                index: band,
                count: self.layout.bands.len(),
            });
        }
        if block_x >= self.tiles_x || block_y >= self.tiles_y {
            return Err(Error::InvalidArgument(format!(
                "tile ({}, {}) outside the {}x{} tile grid",
                block_x, block_y, self.tiles_x, self.tiles_y
            )));
        }
        Ok(((band - 1) * self.tiles_y + block_y) * self.tiles_x + block_x)
    }

    /// Appends the index if it changed and points the header at it
    fn sync_index(&self) -> Result<()> {
        let mut index = self.index.lock();
        if !index.dirty {
            return Ok(());
        }
        let bytes = index.encode(self.byte_order);
        let offset = index.end;
        self.handle.write_at(offset, &bytes)?;

        let mut header = self.header.lock();
        header.offset = offset;
        header.write(&self.handle, MAGIC)?;

        index.end += bytes.len() as u64;
        index.dirty = false;
        trace!(offset, entries = index.entries.len(), "wrote tile index");
        Ok(())
    }
}

impl RasterSource for TiledSource {
    fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    fn read_block(&self, band: usize, block_x: usize, block_y: usize, buf: &mut [u8]) -> Result<()> {
        let i = self.entry_index(band, block_x, block_y)?;
        let (offset, size) = self.index.lock().entries[i];
        if offset == 0 {
            return Ok(());
        }

        let packed = self.handle.read_at(offset, size as usize)?;
        if packed.len() != size as usize {
            return Err(Error::malformed(self.handle.identifier(), format!("tile {} is truncated", i)));
        }
        let mut data = self
            .compression
            .decompress(&packed, buf.len())
            .map_err(|e| Error::malformed(self.handle.identifier(), format!("tile {}: {}", i, e)))?;
        self.byte_order.swap_to_native(self.sample_size, &mut data);
        buf.copy_from_slice(&data);
        Ok(())
    }

    fn write_block(&self, band: usize, block_x: usize, block_y: usize, data: &[u8]) -> Result<()> {
        let i = self.entry_index(band, block_x, block_y)?;
        let mut stored = data.to_vec();
        self.byte_order.swap_to_native(self.sample_size, &mut stored);
        let packed = self.compression.compress(&stored)?;
        let size = u32::try_from(packed.len())
            .map_err(|_| Error::Unsupported(format!("tile of {} bytes", packed.len())))?;

        let mut index = self.index.lock();
        let offset = index.end;
        self.handle.write_at(offset, &packed)?;
        index.end += packed.len() as u64;
        index.entries[i] = (offset, size);
        index.dirty = true;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.sync_index()?;
        self.handle.flush()
    }

    fn write_metadata(&self, layout: &DatasetLayout) -> Result<()> {
        let mut header = self.header.lock();
        let mut updated = header.clone();
        updated.apply_metadata(layout);
        updated.check_crs_fits(self.handle.identifier(), (HEADER_LEN + CRS_CAPACITY) as u64)?;
        updated.write(&self.handle, MAGIC)?;
        *header = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverRegistry;
    use crate::types::{DataType, Window};

    fn registry() -> DriverRegistry {
        DriverRegistry::with_builtin_drivers(Default::default())
    }

    #[test]
    fn test_unwritten_tiles_read_as_no_data() {
        let registry = registry();
        let path = "/vsimem/tiled/sparse.tgd";
        let spec = CreateSpec::new(10, 10, 1, DataType::I16)
            .with_block_size(4, 4)
            .with_no_data(-5.0);
        let ds = registry.create(path, DRIVER_NAME, &spec).unwrap();
        ds.band(1).unwrap().write_window(Window::new(0, 0, 4, 4), &[3i16; 16]).unwrap();
        ds.close().unwrap();

        let ds = registry.open(path, AccessMode::ReadOnly).unwrap();
        let band = ds.band(1).unwrap();
        assert_eq!(band.block_size(), (4, 4));
        let data = band.read_as::<i16>(Window::new(3, 3, 2, 2)).unwrap();
        assert_eq!(data.data, vec![3, -5, -5, -5]);
    }

    #[test]
    fn test_rewrite_after_reopen() {
        let registry = registry();
        let path = "/vsimem/tiled/update.tgd";
        let ds = registry
            .create(path, DRIVER_NAME, &CreateSpec::new(6, 6, 2, DataType::F64).with_block_size(3, 3))
            .unwrap();
        ds.band(2).unwrap().fill(1.5).unwrap();
        ds.close().unwrap();

        let ds = registry.open(path, AccessMode::Update).unwrap();
        ds.band(2).unwrap().write_window(Window::new(2, 2, 2, 2), &[9.0f64; 4]).unwrap();
        ds.close().unwrap();

        let ds = registry.open(path, AccessMode::ReadOnly).unwrap();
        let data = ds.band(2).unwrap().read_as::<f64>(Window::new(1, 1, 3, 1)).unwrap();
        assert_eq!(data.data, vec![1.5, 1.5, 1.5]);
        let data = ds.band(2).unwrap().read_as::<f64>(Window::new(1, 2, 3, 1)).unwrap();
        assert_eq!(data.data, vec![1.5, 9.0, 9.0]);
    }

    #[test]
    fn test_uncompressed_big_endian() {
        let registry = DriverRegistry::builder()
            .register(
                TiledGridDriver::default()
                    .with_compression(Compression::None)
                    .with_byte_order(ByteOrder::BigEndian),
            )
            .build();
        let path = "/vsimem/tiled/raw.tgd";
        let ds = registry
            .create(path, DRIVER_NAME, &CreateSpec::new(3, 2, 1, DataType::U32))
            .unwrap();
        let values = [1u32, 2, 3, 4, 5, 6];
        ds.band(1).unwrap().write_window(Window::new(0, 0, 3, 2), &values).unwrap();
        ds.close().unwrap();

        let ds = registry.open(path, AccessMode::ReadOnly).unwrap();
        let back = ds.band(1).unwrap().read_as::<u32>(Window::new(0, 0, 3, 2)).unwrap();
        assert_eq!(back.data, values.to_vec());
    }

    #[test]
    fn test_corrupt_tile_is_malformed() {
        let registry = registry();
        let path = "/vsimem/tiled/corrupt.tgd";
        let ds = registry
            .create(path, DRIVER_NAME, &CreateSpec::new(4, 4, 1, DataType::U8))
            .unwrap();
        ds.band(1).unwrap().fill(200.0).unwrap();
        ds.close().unwrap();

        // The index written at create time precedes the first tile
        let mut bytes = registry.vfs().read_mem_file(path).unwrap();
        let start = HEADER_LEN + CRS_CAPACITY + INDEX_ENTRY_LEN;
        for b in &mut bytes[start..start + 4] {
            *b ^= 0xff;
        }
        registry.vfs().write_mem_file(path, bytes).unwrap();

        let ds = registry.open(path, AccessMode::ReadOnly).unwrap();
        let err = ds.band(1).unwrap().read_as::<u8>(Window::new(0, 0, 4, 4)).unwrap_err();
        assert!(matches!(err, Error::Block { .. }), "{}", err);
    }

    #[test]
    fn test_index_past_end_is_malformed() {
        let registry = registry();
        let path = "/vsimem/tiled/noindex.tgd";
        registry
            .create(path, DRIVER_NAME, &CreateSpec::new(4, 4, 1, DataType::U8))
            .unwrap()
            .close()
            .unwrap();
        let mut bytes = registry.vfs().read_mem_file(path).unwrap();
        bytes.truncate(HEADER_LEN + CRS_CAPACITY);
        registry.vfs().write_mem_file(path, bytes).unwrap();

        assert!(matches!(
            registry.open(path, AccessMode::ReadOnly),
            Err(Error::MalformedSource { .. })
        ));
    }

    #[test]
    fn test_huge_tile_grid_is_malformed() {
        let registry = registry();
        let path = "/vsimem/tiled/huge.tgd";
        registry
            .create(path, DRIVER_NAME, &CreateSpec::new(4, 4, 1, DataType::U8).with_block_size(1, 1))
            .unwrap()
            .close()
            .unwrap();

        // Width, height and band count, little endian
        let mut bytes = registry.vfs().read_mem_file(path).unwrap();
        for field in [8, 12, 16] {
            bytes[field..field + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        }
        registry.vfs().write_mem_file(path, bytes).unwrap();

        assert!(matches!(
            registry.open(path, AccessMode::ReadOnly),
            Err(Error::MalformedSource { .. })
        ));
    }
}
