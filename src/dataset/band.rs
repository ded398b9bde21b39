//! Raster band handles

use std::collections::BTreeMap;

use crate::error::Result;
use crate::pixel::{Buffer, PixelType};
use crate::types::{ColorInterp, DataType, Window};

use super::access::BandGeometry;
use super::dataset::Dataset;

/// One band of a [`Dataset`]. Borrows the dataset, so it can never outlive it.
#[derive(Debug, Clone, Copy)]
pub struct RasterBand<'a> {
    dataset: &'a Dataset,
    index: usize,
}

impl<'a> RasterBand<'a> {
    pub(crate) fn new(dataset: &'a Dataset, index: usize) -> Self {
        Self { dataset, index }
    }

    pub(crate) fn geometry(&self) -> Result<BandGeometry> {
        self.dataset.core().geometry(self.index)
    }

    fn with_layout<R>(&self, f: impl FnOnce(&crate::driver::BandLayout) -> R) -> R {
        let layout = self.dataset.core().layout.read();
        f(&layout.bands[self.index - 1])
    }

    fn update_layout(&self, f: impl FnOnce(&mut crate::driver::BandLayout)) -> Result<()> {
        let index = self.index - 1;
        self.dataset
            .core()
            .update_layout(|layout| f(&mut layout.bands[index]))
    }

    /// 1-based index within the dataset
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn dataset(&self) -> &'a Dataset {
        self.dataset
    }

    pub fn data_type(&self) -> DataType {
        self.with_layout(|b| b.data_type)
    }

    /// `(width, height)` of one cache tile
    pub fn block_size(&self) -> (usize, usize) {
        self.with_layout(|b| (b.block_width, b.block_height))
    }

    /// `(width, height)` of the band in pixels
    pub fn size(&self) -> (usize, usize) {
        self.dataset.raster_size()
    }

    /// Number of blocks along x and y
    pub fn block_count(&self) -> (usize, usize) {
        let (width, height) = self.size();
        self.with_layout(|b| b.block_grid(width, height))
    }

    pub fn no_data_value(&self) -> Option<f64> {
        self.with_layout(|b| b.no_data)
    }

    pub fn set_no_data_value(&self, no_data: Option<f64>) -> Result<()> {
        self.update_layout(|b| b.no_data = no_data)
    }

    pub fn color_interpretation(&self) -> ColorInterp {
        self.with_layout(|b| b.color_interp)
    }

    pub fn set_color_interpretation(&self, color_interp: ColorInterp) -> Result<()> {
        self.update_layout(|b| b.color_interp = color_interp)
    }

    pub fn description(&self) -> String {
        self.with_layout(|b| b.description.clone())
    }

    pub fn set_description(&self, description: &str) -> Result<()> {
        self.update_layout(|b| b.description = description.to_string())
    }

    pub fn metadata_item(&self, key: &str) -> Option<String> {
        self.with_layout(|b| b.metadata.get(key).cloned())
    }

    pub fn set_metadata_item(&self, key: &str, value: &str) -> Result<()> {
        self.update_layout(|b| {
            b.metadata.insert(key.to_string(), value.to_string());
        })
    }

    pub fn metadata(&self) -> BTreeMap<String, String> {
        self.with_layout(|b| b.metadata.clone())
    }

    /// Reads `window` into `out` (row-major, `window.width * window.height`
    /// samples), converting from the band type to `T`
    pub fn read_window<T: PixelType>(&self, window: Window, out: &mut [T]) -> Result<()> {
        let geom = self.geometry()?;
        self.dataset.core().read_region(&geom, window, out)
    }

    /// Reads `window` into a new buffer
    pub fn read_as<T: PixelType>(&self, window: Window) -> Result<Buffer<T>> {
        let mut buffer = Buffer::zeroed((window.width, window.height));
        self.read_window(window, &mut buffer.data)?;
        Ok(buffer)
    }

    /// Writes `data` (row-major, shaped like `window`), converting from `T` to the
    /// band type with clamping
    pub fn write_window<T: PixelType>(&self, window: Window, data: &[T]) -> Result<()> {
        let geom = self.geometry()?;
        self.dataset.core().write_region(&geom, window, data)
    }

    /// Whole cache tile at block coordinates, padding included
    pub fn read_block<T: PixelType>(&self, block_x: usize, block_y: usize) -> Result<Buffer<T>> {
        let geom = self.geometry()?;
        let mut buffer = Buffer::zeroed((geom.block_width, geom.block_height));
        self.dataset
            .core()
            .read_whole_block(&geom, block_x, block_y, &mut buffer.data)?;
        Ok(buffer)
    }

    pub fn write_block<T: PixelType>(&self, block_x: usize, block_y: usize, data: &[T]) -> Result<()> {
        let geom = self.geometry()?;
        self.dataset
            .core()
            .write_whole_block(&geom, block_x, block_y, data)
    }

    /// Sets every pixel to `value`
    pub fn fill(&self, value: f64) -> Result<()> {
        let geom = self.geometry()?;
        self.dataset.core().fill_band(&geom, value)
    }
}
