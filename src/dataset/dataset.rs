//! Open datasets

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::cache::{BlockCache, BlockKey, BlockStore, DatasetId};
use crate::driver::{DatasetLayout, DriverRegistry, OpenRecord, RasterSource};
use crate::error::{Error, Result};
use crate::pixel::{Buffer, PixelType};
use crate::types::{AccessMode, GeoTransform, Window};

use super::access::BandGeometry;
use super::band::RasterBand;

/// Shared state of an open dataset. Registered with the block cache as the
/// write-back target of its blocks.
pub(crate) struct DatasetCore {
    pub(crate) id: DatasetId,
    pub(crate) identifier: String,
    pub(crate) driver: String,
    pub(crate) mode: AccessMode,
    pub(crate) source: Box<dyn RasterSource>,
    pub(crate) registry: DriverRegistry,
    pub(crate) layout: RwLock<DatasetLayout>,
    metadata_dirty: AtomicBool,
    error: Mutex<Option<String>>,
}

impl DatasetCore {
    pub(crate) fn cache(&self) -> &BlockCache {
        self.registry.cache()
    }

    pub(crate) fn geometry(&self, band: usize) -> Result<BandGeometry> {
        let layout = self.layout.read();
        let b = layout.band(band).ok_or(Error::BandOutOfRange {
            index: band,
            count: layout.bands.len(),
        })?;
        Ok(BandGeometry {
            band,
            data_type: b.data_type,
            width: layout.width,
            height: layout.height,
            block_width: b.block_width,
            block_height: b.block_height,
            no_data: b.no_data,
        })
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if !self.mode.is_writable() {
            return Err(Error::ReadOnly(self.identifier.clone()));
        }
        if let Some(message) = self.error.lock().clone() {
            return Err(Error::DatasetInError {
                dataset: self.identifier.clone(),
                message,
            });
        }
        Ok(())
    }

    /// Applies a metadata change, to be handed to the driver on the next flush
    pub(crate) fn update_layout(&self, f: impl FnOnce(&mut DatasetLayout)) -> Result<()> {
        if !self.mode.is_writable() {
            return Err(Error::ReadOnly(self.identifier.clone()));
        }
        f(&mut self.layout.write());
        self.metadata_dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Records derived metadata (statistics). Allowed on read-only datasets, where
    /// it is kept in memory only.
    pub(crate) fn annotate(&self, f: impl FnOnce(&mut DatasetLayout)) {
        f(&mut self.layout.write());
        if self.mode.is_writable() {
            self.metadata_dirty.store(true, Ordering::SeqCst);
        }
    }

    fn mark_error(&self, message: String) {
        let mut error = self.error.lock();
        if error.is_none() {
            warn!(dataset = %self.identifier, %message, "dataset marked in error");
            *error = Some(message);
        }
    }
}

impl BlockStore for DatasetCore {
    fn write_back(&self, key: &BlockKey, data: &[u8]) -> Result<()> {
        debug_assert_eq!(key.dataset, self.id);
        self.source
            .write_block(key.band, key.x, key.y, data)
            .map_err(|e| e.in_block(&self.identifier, key.band, key.x, key.y))
    }

    fn record_failure(&self, error: &Error) {
        self.mark_error(error.to_string());
    }
}

/// An open raster dataset
///
/// Dropping a dataset that was not closed flushes it on a best-effort basis and
/// releases its cache entries.
pub struct Dataset {
    core: Arc<DatasetCore>,
    overviews: RwLock<Vec<Arc<Dataset>>>,
    closed: bool,
}

impl Dataset {
    /// Wraps a driver source after validating its geometry
    pub(crate) fn from_source(
        registry: DriverRegistry,
        source: Box<dyn RasterSource>,
        identifier: &str,
        driver: &str,
        mode: AccessMode,
    ) -> Result<Self> {
        let layout = source.layout().clone();
        layout.validate(identifier)?;

        let id = DatasetId::next();
        let core = Arc::new(DatasetCore {
            id,
            identifier: identifier.to_string(),
            driver: driver.to_string(),
            mode,
            source,
            registry: registry.clone(),
            layout: RwLock::new(layout),
            metadata_dirty: AtomicBool::new(false),
            error: Mutex::new(None),
        });

        let store: Weak<dyn BlockStore> = Arc::downgrade(&core) as Weak<dyn BlockStore>;
        registry.cache().register_store(id, store);
        registry.record_open(OpenRecord {
            id,
            identifier: identifier.to_string(),
            driver: driver.to_string(),
            mode,
        });

        Ok(Self {
            core,
            overviews: RwLock::new(Vec::new()),
            closed: false,
        })
    }

    pub(crate) fn core(&self) -> &DatasetCore {
        &self.core
    }

    /// Process-unique identity, also the dataset part of its cache keys
    pub fn id(&self) -> DatasetId {
        self.core.id
    }

    /// Identifier the dataset was opened or created with
    pub fn description(&self) -> &str {
        &self.core.identifier
    }

    /// Name of the driver serving this dataset
    pub fn driver_name(&self) -> &str {
        &self.core.driver
    }

    /// Mode the dataset was opened with
    pub fn access_mode(&self) -> AccessMode {
        self.core.mode
    }

    /// Registry that opened the dataset
    pub fn registry(&self) -> &DriverRegistry {
        &self.core.registry
    }

    /// `(width, height)` in pixels
    pub fn raster_size(&self) -> (usize, usize) {
        let layout = self.core.layout.read();
        (layout.width, layout.height)
    }

    /// Number of bands
    pub fn raster_count(&self) -> usize {
        self.core.layout.read().bands.len()
    }

    /// Snapshot of the current layout, including metadata
    pub fn layout(&self) -> DatasetLayout {
        self.core.layout.read().clone()
    }

    /// 1-based band access
    pub fn band(&self, index: usize) -> Result<RasterBand<'_>> {
        let count = self.raster_count();
        if index == 0 || index > count {
            return Err(Error::BandOutOfRange { index, count });
        }
        Ok(RasterBand::new(self, index))
    }

    /// All bands in index order
    pub fn bands(&self) -> impl Iterator<Item = RasterBand<'_>> {
        (1..=self.raster_count()).map(move |index| RasterBand::new(self, index))
    }

    pub fn geo_transform(&self) -> Option<GeoTransform> {
        self.core.layout.read().metadata.geo_transform
    }

    pub fn set_geo_transform(&self, geo_transform: GeoTransform) -> Result<()> {
        self.core
            .update_layout(|l| l.metadata.geo_transform = Some(geo_transform))
    }

    pub fn crs(&self) -> Option<String> {
        self.core.layout.read().metadata.crs.clone()
    }

    pub fn set_crs(&self, crs: &str) -> Result<()> {
        self.core
            .update_layout(|l| l.metadata.crs = Some(crs.to_string()))
    }

    /// Looks up `key` in `domain` (`""` for the default domain)
    pub fn metadata_item(&self, key: &str, domain: &str) -> Option<String> {
        self.core
            .layout
            .read()
            .metadata
            .item(domain, key)
            .map(str::to_string)
    }

    pub fn set_metadata_item(&self, key: &str, value: &str, domain: &str) -> Result<()> {
        self.core
            .update_layout(|l| l.metadata.set_item(domain, key, value))
    }

    /// All items of `domain`, empty when the domain is not set
    pub fn metadata(&self, domain: &str) -> BTreeMap<String, String> {
        self.core
            .layout
            .read()
            .metadata
            .domains
            .get(domain)
            .cloned()
            .unwrap_or_default()
    }

    pub fn metadata_domains(&self) -> Vec<String> {
        self.core
            .layout
            .read()
            .metadata
            .domains
            .keys()
            .cloned()
            .collect()
    }

    /// Reads the same window from every band in parallel
    pub fn read_bands_window<T: PixelType>(&self, window: Window) -> Result<Vec<Buffer<T>>> {
        (1..=self.raster_count())
            .into_par_iter()
            .map(|index| RasterBand::new(self, index).read_as::<T>(window))
            .collect()
    }

    /// Whether a write-back failure has left the dataset unusable for writing
    pub fn in_error(&self) -> bool {
        self.core.error.lock().is_some()
    }

    pub fn error_message(&self) -> Option<String> {
        self.core.error.lock().clone()
    }

    /// Writes back dirty blocks in row-major order, then changed metadata, then
    /// flushes the driver. Failures leave the dataset in error.
    pub fn flush(&self) -> Result<()> {
        let core = &self.core;
        let cached = core.cache().flush_dataset(core.id, core.as_ref());
        if let Err(e) = &cached {
            core.mark_error(e.to_string());
        }

        let metadata = if core.metadata_dirty.swap(false, Ordering::SeqCst) {
            let layout = core.layout.read().clone();
            let written = core.source.write_metadata(&layout);
            if written.is_err() {
                core.metadata_dirty.store(true, Ordering::SeqCst);
            }
            written
        } else {
            Ok(())
        };

        let synced = if core.mode.is_writable() {
            core.source.flush()
        } else {
            Ok(())
        };

        cached?;
        metadata?;
        synced?;

        if let Some(message) = core.error.lock().clone() {
            return Err(Error::DatasetInError {
                dataset: core.identifier.clone(),
                message,
            });
        }
        debug!(dataset = %core.identifier, "flushed");
        Ok(())
    }

    /// Flushes, then releases the dataset's cache entries and bookkeeping.
    /// The flush result is returned; resources are released either way.
    pub fn close(mut self) -> Result<()> {
        let result = self.flush();
        self.release();
        result
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.overviews.write().clear();

        let core = &self.core;
        let discarded = core.cache().discard_dataset(core.id);
        core.registry.forget(core.id);
        info!(dataset = %core.identifier, id = %core.id, discarded, "closed dataset");
    }

    pub(crate) fn set_overviews(&self, overviews: Vec<Arc<Dataset>>) {
        *self.overviews.write() = overviews;
    }

    pub fn overview_count(&self) -> usize {
        self.overviews.read().len()
    }

    /// Overview `index`, 0 being the finest
    pub fn overview(&self, index: usize) -> Option<Arc<Dataset>> {
        self.overviews.read().get(index).cloned()
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(error) = self.flush() {
            warn!(dataset = %self.core.identifier, %error, "flush on drop failed");
        }
        self.release();
    }
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("id", &self.core.id)
            .field("identifier", &self.core.identifier)
            .field("driver", &self.core.driver)
            .field("mode", &self.core.mode)
            .finish()
    }
}
