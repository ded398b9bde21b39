//! Window assembly: mapping pixel windows onto cached blocks

use crate::cache::{BlockBuffer, BlockKey, Populate};
use crate::driver::OutOfExtentWrite;
use crate::error::{Error, Result};
use crate::pixel::{self, PixelType};
use crate::types::{DataType, Window};

use super::dataset::DatasetCore;

/// Block geometry of one band, copied out of the layout lock
#[derive(Debug, Clone, Copy)]
pub(crate) struct BandGeometry {
    pub band: usize,
    pub data_type: DataType,
    pub width: usize,
    pub height: usize,
    pub block_width: usize,
    pub block_height: usize,
    pub no_data: Option<f64>,
}

impl BandGeometry {
    pub fn block_bytes(&self) -> usize {
        self.block_width * self.block_height * self.data_type.size()
    }

    pub fn blocks_x(&self) -> usize {
        self.width.div_ceil(self.block_width)
    }

    pub fn blocks_y(&self) -> usize {
        self.height.div_ceil(self.block_height)
    }

    /// Value used for pixels no driver data exists for
    pub fn fill_value(&self) -> f64 {
        self.no_data.unwrap_or(0.0)
    }

    /// In-extent part of a block as `(x, y, width, height)` in raster coordinates
    pub fn block_extent(&self, block_x: usize, block_y: usize) -> (usize, usize, usize, usize) {
        let x0 = block_x * self.block_width;
        let y0 = block_y * self.block_height;
        (
            x0,
            y0,
            self.block_width.min(self.width - x0),
            self.block_height.min(self.height - y0),
        )
    }

    fn check_block(&self, block_x: usize, block_y: usize) -> Result<()> {
        if block_x >= self.blocks_x() || block_y >= self.blocks_y() {
            return Err(Error::InvalidArgument(format!(
                "block ({}, {}) outside the {}x{} block grid of band {}",
                block_x,
                block_y,
                self.blocks_x(),
                self.blocks_y(),
                self.band
            )));
        }
        Ok(())
    }
}

/// A rectangle of the raster, in raster coordinates
#[derive(Debug, Clone, Copy)]
struct Rect {
    x: usize,
    y: usize,
    width: usize,
    height: usize,
}

impl Rect {
    /// Blocks touched by this rectangle, row-major
    fn blocks(&self, geom: &BandGeometry) -> impl Iterator<Item = (usize, usize)> {
        let bx0 = self.x / geom.block_width;
        let bx1 = (self.x + self.width - 1) / geom.block_width;
        let by0 = self.y / geom.block_height;
        let by1 = (self.y + self.height - 1) / geom.block_height;
        (by0..=by1).flat_map(move |by| (bx0..=bx1).map(move |bx| (bx, by)))
    }

    /// Intersection with one block
    fn within_block(&self, geom: &BandGeometry, block_x: usize, block_y: usize) -> Rect {
        let (bx, by, bw, bh) = geom.block_extent(block_x, block_y);
        let x0 = self.x.max(bx);
        let y0 = self.y.max(by);
        let x1 = (self.x + self.width).min(bx + bw);
        let y1 = (self.y + self.height).min(by + bh);
        Rect {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        }
    }
}

impl DatasetCore {
    fn window_error(&self, window: Window, geom: &BandGeometry) -> Error {
        Error::WindowOutOfRange {
            x: window.x,
            y: window.y,
            width: window.width,
            height: window.height,
            raster_width: geom.width,
            raster_height: geom.height,
        }
    }

    fn clip(&self, window: Window, geom: &BandGeometry) -> Result<Rect> {
        match window.clip(geom.width, geom.height) {
            Some((x, y, width, height)) => Ok(Rect { x, y, width, height }),
            None => Err(self.window_error(window, geom)),
        }
    }

    /// Runs `f` on a cached block, loading it through the driver on a miss.
    /// With `overwrite` the driver read is skipped.
    pub(crate) fn with_block<R>(
        &self,
        geom: &BandGeometry,
        block_x: usize,
        block_y: usize,
        overwrite: bool,
        f: impl FnOnce(&mut BlockBuffer<'_>) -> R,
    ) -> Result<R> {
        geom.check_block(block_x, block_y)?;
        let key = BlockKey::new(self.id, geom.band, block_x, block_y);

        let load = |buf: &mut [u8]| -> Result<()> {
            pixel::fill_bytes(geom.data_type, buf, geom.fill_value());
            self.source
                .read_block(geom.band, block_x, block_y, buf)
                .map_err(|e| e.in_block(&self.identifier, geom.band, block_x, block_y))
        };
        let populate = if overwrite {
            Populate::Overwrite
        } else {
            Populate::Load(&load)
        };

        self.cache()
            .with_block(key, geom.block_bytes(), populate, f)
            .map_err(|e| e.in_block(&self.identifier, geom.band, block_x, block_y))
    }

    /// Reads `window` of a band into `out`, converting to `T`. Out-of-extent
    /// samples take the no-data value, or zero without one.
    pub(crate) fn read_region<T: PixelType>(
        &self,
        geom: &BandGeometry,
        window: Window,
        out: &mut [T],
    ) -> Result<()> {
        check_len(window, out.len())?;
        let rect = self.clip(window, geom)?;
        if !window.is_inside(geom.width, geom.height) {
            out.fill(T::from_f64(geom.fill_value()));
        }

        for (bx, by) in rect.blocks(geom) {
            let part = rect.within_block(geom, bx, by);
            let (block_x0, block_y0, _, _) = geom.block_extent(bx, by);
            self.with_block(geom, bx, by, false, |buf| {
                let data = buf.data();
                for row in part.y..part.y + part.height {
                    let src = (row - block_y0) * geom.block_width + (part.x - block_x0);
                    let dst = window_offset(window, part.x, row);
                    pixel::copy_to_typed(geom.data_type, data, src, out, dst, part.width);
                }
            })?;
        }
        Ok(())
    }

    /// Writes `data` (laid out as `window`) into a band, converting from `T`.
    ///
    /// Blocks only partly covered are loaded first so untouched pixels survive.
    pub(crate) fn write_region<T: PixelType>(
        &self,
        geom: &BandGeometry,
        window: Window,
        data: &[T],
    ) -> Result<()> {
        self.ensure_writable()?;
        check_len(window, data.len())?;
        let rect = self.clip(window, geom)?;
        if !window.is_inside(geom.width, geom.height)
            && self.source.out_of_extent_writes() == OutOfExtentWrite::Reject
        {
            return Err(self.window_error(window, geom));
        }

        for (bx, by) in rect.blocks(geom) {
            let part = rect.within_block(geom, bx, by);
            let (block_x0, block_y0, valid_w, valid_h) = geom.block_extent(bx, by);
            let covers_block = part.width == valid_w && part.height == valid_h;

            self.with_block(geom, bx, by, covers_block, |buf| {
                let block = buf.data_mut();
                for row in part.y..part.y + part.height {
                    let dst = (row - block_y0) * geom.block_width + (part.x - block_x0);
                    let src = window_offset(window, part.x, row);
                    pixel::copy_from_typed(data, src, geom.data_type, block, dst, part.width);
                }
            })?;
        }
        Ok(())
    }

    /// Copies a whole cached block out as `T`
    pub(crate) fn read_whole_block<T: PixelType>(
        &self,
        geom: &BandGeometry,
        block_x: usize,
        block_y: usize,
        out: &mut [T],
    ) -> Result<()> {
        let samples = geom.block_width * geom.block_height;
        if out.len() != samples {
            return Err(Error::InvalidArgument(format!(
                "block buffer holds {} samples, expected {}",
                out.len(),
                samples
            )));
        }
        self.with_block(geom, block_x, block_y, false, |buf| {
            pixel::copy_to_typed(geom.data_type, buf.data(), 0, out, 0, samples);
        })
    }

    /// Replaces a whole cached block from `T` samples
    pub(crate) fn write_whole_block<T: PixelType>(
        &self,
        geom: &BandGeometry,
        block_x: usize,
        block_y: usize,
        data: &[T],
    ) -> Result<()> {
        self.ensure_writable()?;
        let samples = geom.block_width * geom.block_height;
        if data.len() != samples {
            return Err(Error::InvalidArgument(format!(
                "block buffer holds {} samples, expected {}",
                data.len(),
                samples
            )));
        }
        self.with_block(geom, block_x, block_y, true, |buf| {
            pixel::copy_from_typed(data, 0, geom.data_type, buf.data_mut(), 0, samples);
        })
    }

    /// Sets every pixel of a band to `value`
    pub(crate) fn fill_band(&self, geom: &BandGeometry, value: f64) -> Result<()> {
        self.ensure_writable()?;
        for by in 0..geom.blocks_y() {
            for bx in 0..geom.blocks_x() {
                self.with_block(geom, bx, by, true, |buf| {
                    pixel::fill_bytes(geom.data_type, buf.data_mut(), value);
                })?;
            }
        }
        Ok(())
    }
}

fn check_len(window: Window, len: usize) -> Result<()> {
    if window.width == 0 || window.height == 0 {
        return Err(Error::InvalidArgument(format!(
            "empty window {}x{}",
            window.width, window.height
        )));
    }
    if len != window.pixel_count() {
        return Err(Error::InvalidArgument(format!(
            "buffer holds {} samples, window {}x{} needs {}",
            len,
            window.width,
            window.height,
            window.pixel_count()
        )));
    }
    Ok(())
}

/// Index into a window-shaped buffer of raster position (`x`, `y`)
fn window_offset(window: Window, x: usize, y: usize) -> usize {
    (y as i64 - window.y) as usize * window.width + (x as i64 - window.x) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geom() -> BandGeometry {
        BandGeometry {
            band: 1,
            data_type: DataType::U16,
            width: 10,
            height: 7,
            block_width: 4,
            block_height: 3,
            no_data: None,
        }
    }

    #[test]
    fn test_block_grid_and_edges() {
        let g = geom();
        assert_eq!((g.blocks_x(), g.blocks_y()), (3, 3));
        assert_eq!(g.block_extent(2, 2), (8, 6, 2, 1));
        assert_eq!(g.block_bytes(), 24);
        assert!(g.check_block(3, 0).is_err());
    }

    #[test]
    fn test_rect_blocks_are_row_major() {
        let g = geom();
        let rect = Rect {
            x: 3,
            y: 2,
            width: 2,
            height: 2,
        };
        let blocks: Vec<_> = rect.blocks(&g).collect();
        assert_eq!(blocks, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);

        let part = rect.within_block(&g, 1, 1);
        assert_eq!((part.x, part.y, part.width, part.height), (4, 3, 1, 1));
    }

    #[test]
    fn test_window_offset() {
        let window = Window::new(-2, -1, 5, 5);
        assert_eq!(window_offset(window, 0, 0), 5 + 2);
    }

    #[test]
    fn test_check_len() {
        assert!(check_len(Window::new(0, 0, 2, 2), 4).is_ok());
        assert!(check_len(Window::new(0, 0, 2, 2), 3).is_err());
        assert!(check_len(Window::new(0, 0, 0, 2), 0).is_err());
    }
}
