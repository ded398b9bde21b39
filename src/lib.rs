//! blockraster - block-cached raster data access
//!
//! blockraster opens raster datasets through pluggable format drivers and serves
//! window reads and writes through a shared, memory-bounded block cache.
//!
//! # Examples
//!
//! ## Creating and reading back a raster
//!
//! ```no_run
//! use blockraster::{AccessMode, CreateSpec, DataType, DriverRegistry, EngineConfig, Window};
//!
//! let registry = DriverRegistry::with_builtin_drivers(EngineConfig::from_env()?);
//!
//! let spec = CreateSpec::new(1024, 1024, 1, DataType::I16).with_no_data(-9999.0);
//! let ds = registry.create("dem.tgd", "TiledGrid", &spec)?;
//! ds.band(1)?.write_window(Window::new(0, 0, 2, 2), &[10i16, 20, 30, 40])?;
//! ds.close()?;
//!
//! let ds = registry.open("dem.tgd", AccessMode::ReadOnly)?;
//! let values = ds.band(1)?.read_as::<f32>(Window::new(0, 0, 2, 2))?;
//! println!("{:?}", values.data);
//! # Ok::<(), blockraster::Error>(())
//! ```
//!
//! ## Inspecting the cache
//!
//! ```no_run
//! use blockraster::{AccessMode, DriverRegistry};
//!
//! let registry = DriverRegistry::with_builtin_drivers(Default::default());
//! let ds = registry.open("mosaic.vrt", AccessMode::ReadOnly)?;
//! println!("checksum {}", ds.band(1)?.checksum()?);
//!
//! let stats = registry.cache().stats();
//! println!("hit rate {:.2}, {} bytes resident", stats.hit_rate(), stats.used_bytes);
//! # Ok::<(), blockraster::Error>(())
//! ```

pub mod cache;
pub mod compression;
pub mod config;
pub mod dataset;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod io;
pub mod pixel;
pub mod projection;
pub mod types;

pub use cache::{BlockCache, BlockKey, CacheStats, DatasetId};
pub use config::{CacheConfig, EngineConfig, VfsConfig};
pub use dataset::{Dataset, MaskFlags, RasterBand, Resampling, Statistics};
pub use driver::{
    BandSpec, CreateSpec, Driver, DriverRegistry, DriverRegistryBuilder, Probe, RasterSource,
};
pub use error::{Error, Result};
pub use io::{ByteOrder, Vfs};
pub use pixel::{Buffer, PixelType};
pub use projection::{CoordinateTransform, IdentityProjection, ProjectionService};
pub use types::{AccessMode, ColorInterp, DataType, Dimensions, GeoTransform, Window};
