//! Format driver contract and registry

pub mod layout;
pub mod probe;
pub mod registry;
pub mod traits;

pub use layout::{BandLayout, BandSpec, CreateSpec, DatasetLayout, DatasetMetadata, DEFAULT_DOMAIN};
pub use probe::Probe;
pub use registry::{DriverRegistry, DriverRegistryBuilder, OpenRecord};
pub use traits::{DetectionPriority, Driver, OpenContext, OutOfExtentWrite, RasterSource};
