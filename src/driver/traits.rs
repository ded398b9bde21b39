//! The contract every format driver implements

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::io::Vfs;
use crate::types::AccessMode;

use super::layout::{CreateSpec, DatasetLayout};
use super::probe::Probe;
use super::registry::DriverRegistry;

/// Order in which drivers are asked to identify a source. Drivers with an
/// unambiguous magic number go first; catch-all drivers go last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DetectionPriority {
    Signature,
    Normal,
    Fallback,
}

/// What the engine does with the out-of-extent part of a write window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutOfExtentWrite {
    /// Discard samples outside the raster
    Clip,
    /// Fail the whole write with `WindowOutOfRange`
    Reject,
}

/// Environment handed to driver entry points
pub struct OpenContext<'a> {
    registry: &'a DriverRegistry,
}

impl<'a> OpenContext<'a> {
    pub(crate) fn new(registry: &'a DriverRegistry) -> Self {
        Self { registry }
    }

    pub fn vfs(&self) -> &Vfs {
        self.registry.vfs()
    }

    pub fn config(&self) -> &EngineConfig {
        self.registry.config()
    }

    /// The registry performing the open, for drivers that reference other datasets
    pub fn registry(&self) -> &'a DriverRegistry {
        self.registry
    }
}

/// A format driver: detection plus open/create entry points
pub trait Driver: Send + Sync {
    /// Short unique name, e.g. `"MEM"`
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// File extensions commonly used by the format, lower case, without the dot
    fn extensions(&self) -> &[&str] {
        &[]
    }

    fn priority(&self) -> DetectionPriority {
        DetectionPriority::Normal
    }

    /// Whether this driver can handle the probed source. Must only look at the
    /// probe and must be deterministic.
    fn identify(&self, probe: &Probe) -> bool;

    fn open(
        &self,
        ctx: &OpenContext<'_>,
        probe: &Probe,
        mode: AccessMode,
    ) -> Result<Box<dyn RasterSource>>;

    fn can_create(&self) -> bool {
        false
    }

    fn create(
        &self,
        _ctx: &OpenContext<'_>,
        _path: &str,
        _spec: &CreateSpec,
    ) -> Result<Box<dyn RasterSource>> {
        Err(Error::Unsupported(format!(
            "driver {} cannot create datasets",
            self.name()
        )))
    }
}

/// Per-dataset driver state
///
/// Block buffers are `block_width * block_height` samples in native byte order,
/// row-major. For edge blocks only the part inside the raster is meaningful; the
/// engine pre-fills buffers before `read_block`, so drivers may leave the rest
/// untouched. Calls for different blocks may run concurrently; calls for the same
/// block never overlap.
pub trait RasterSource: Send + Sync {
    fn layout(&self) -> &DatasetLayout;

    /// Decodes one block of 1-based `band` into `buf`
    fn read_block(&self, band: usize, block_x: usize, block_y: usize, buf: &mut [u8]) -> Result<()>;

    /// Persists one block of 1-based `band`
    fn write_block(&self, _band: usize, _block_x: usize, _block_y: usize, _data: &[u8]) -> Result<()> {
        Err(Error::Unsupported("block writes".to_string()))
    }

    /// Pushes pending state to the backing file
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Persists changed metadata and georeferencing
    fn write_metadata(&self, _layout: &DatasetLayout) -> Result<()> {
        Ok(())
    }

    fn out_of_extent_writes(&self) -> OutOfExtentWrite {
        OutOfExtentWrite::Clip
    }
}
