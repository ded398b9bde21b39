//! In-memory rasters
//!
//! Create-only. Blocks are allocated on first write; blocks never written read
//! as the band's no-data value, or zero.

use parking_lot::Mutex;

use crate::driver::{CreateSpec, DatasetLayout, Driver, OpenContext, Probe, RasterSource};
use crate::error::{Error, Result};
use crate::types::AccessMode;

pub const DRIVER_NAME: &str = "MEM";

#[derive(Debug, Default, Clone, Copy)]
pub struct MemDriver;

impl Driver for MemDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn description(&self) -> &str {
        "In-memory raster"
    }

    fn identify(&self, _probe: &Probe) -> bool {
        false
    }

    fn open(&self, _ctx: &OpenContext<'_>, probe: &Probe, _mode: AccessMode) -> Result<Box<dyn RasterSource>> {
        Err(Error::Unsupported(format!(
            "in-memory rasters cannot be reopened ('{}')",
            probe.identifier
        )))
    }

    fn can_create(&self) -> bool {
        true
    }

    fn create(&self, _ctx: &OpenContext<'_>, _path: &str, spec: &CreateSpec) -> Result<Box<dyn RasterSource>> {
        // One scanline per block unless asked otherwise
        let layout = spec.to_layout((spec.width, 1));
        Ok(Box::new(MemSource::new(layout)))
    }
}

/// Block store of one in-memory dataset
pub struct MemSource {
    layout: DatasetLayout,
    blocks_x: Vec<usize>,
    blocks: Vec<Vec<Mutex<Option<Vec<u8>>>>>,
}

impl MemSource {
    pub fn new(layout: DatasetLayout) -> Self {
        let mut blocks_x = Vec::with_capacity(layout.bands.len());
        let blocks = layout
            .bands
            .iter()
            .map(|band| {
                let (nx, ny) = band.block_grid(layout.width, layout.height);
                blocks_x.push(nx);
                (0..nx * ny).map(|_| Mutex::new(None)).collect()
            })
            .collect();
        Self {
            layout,
            blocks_x,
            blocks,
        }
    }

    fn slot(&self, band: usize, block_x: usize, block_y: usize) -> Result<&Mutex<Option<Vec<u8>>>> {
        let band_blocks = band
            .checked_sub(1)
            .and_then(|i| self.blocks.get(i))
            .ok_or(Error::BandOutOfRange {
                index: band,
                count: self.blocks.len(),
            })?;
        let nx = self.blocks_x[band - 1];
        if block_x >= nx {
            return Err(Error::InvalidArgument(format!("block column {} out of range", block_x)));
        }
        band_blocks
            .get(block_y * nx + block_x)
            .ok_or_else(|| Error::InvalidArgument(format!("block row {} out of range", block_y)))
    }
}

impl RasterSource for MemSource {
    fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    fn read_block(&self, band: usize, block_x: usize, block_y: usize, buf: &mut [u8]) -> Result<()> {
        if let Some(data) = self.slot(band, block_x, block_y)?.lock().as_ref() {
            buf.copy_from_slice(data);
        }
        Ok(())
    }

    fn write_block(&self, band: usize, block_x: usize, block_y: usize, data: &[u8]) -> Result<()> {
        *self.slot(band, block_x, block_y)?.lock() = Some(data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::BandLayout;
    use crate::types::DataType;

    fn source() -> MemSource {
        MemSource::new(DatasetLayout::new(
            5,
            3,
            vec![BandLayout::new(DataType::U8, 2, 2)],
        ))
    }

    #[test]
    fn test_unwritten_block_leaves_buffer() {
        let src = source();
        let mut buf = vec![9u8; 4];
        src.read_block(1, 2, 1, &mut buf).unwrap();
        assert_eq!(buf, vec![9; 4]);
    }

    #[test]
    fn test_write_then_read_block() {
        let src = source();
        src.write_block(1, 1, 0, &[1, 2, 3, 4]).unwrap();
        let mut buf = vec![0u8; 4];
        src.read_block(1, 1, 0, &mut buf).unwrap();
        assert_eq!(buf, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_out_of_range_addresses() {
        let src = source();
        let mut buf = vec![0u8; 4];
        assert!(matches!(
            src.read_block(2, 0, 0, &mut buf),
            Err(Error::BandOutOfRange { index: 2, count: 1 })
        ));
        assert!(src.read_block(1, 3, 0, &mut buf).is_err());
        assert!(src.read_block(1, 0, 2, &mut buf).is_err());
    }
}
