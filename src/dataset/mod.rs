//! Dataset / raster band object model
//!
//! A [`Dataset`] wraps the driver state of one open source and owns its bands.
//! [`RasterBand`] handles borrow their dataset and translate pixel windows into
//! block requests against the shared block cache.

mod access;
#[allow(clippy::module_inception)]
mod dataset;
mod band;
mod mask;
mod overview;
mod stats;

pub use band::RasterBand;
pub use dataset::Dataset;
pub use mask::{MaskFlags, MASK_INVALID, MASK_VALID};
pub use overview::Resampling;
pub use stats::{
    Statistics, STATISTICS_MAXIMUM, STATISTICS_MEAN, STATISTICS_MINIMUM, STATISTICS_STDDEV,
};
