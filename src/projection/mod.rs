//! Coordinate reference system collaborator
//!
//! The engine stores CRS identifiers as opaque strings. Transforming coordinates
//! between them is delegated to a [`ProjectionService`]. [`IdentityProjection`]
//! handles the trivial case; the `proj` feature adds [`ProjProjection`].

#[cfg(feature = "proj")]
mod transformer;

#[cfg(feature = "proj")]
pub use transformer::ProjProjection;

use crate::dataset::Dataset;
use crate::error::{Error, Result};

/// A coordinate transform between two fixed reference systems
pub trait CoordinateTransform: Send {
    fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)>;

    fn transform_many(&self, coords: &[(f64, f64)]) -> Result<Vec<(f64, f64)>> {
        coords.iter().map(|&(x, y)| self.transform(x, y)).collect()
    }
}

/// Builds transforms between CRS identifiers
pub trait ProjectionService: Send + Sync {
    fn transformer(&self, from_crs: &str, to_crs: &str) -> Result<Box<dyn CoordinateTransform>>;
}

/// Service that only knows the identity transform
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityProjection;

struct Identity;

impl CoordinateTransform for Identity {
    fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        Ok((x, y))
    }
}

impl ProjectionService for IdentityProjection {
    fn transformer(&self, from_crs: &str, to_crs: &str) -> Result<Box<dyn CoordinateTransform>> {
        if from_crs.trim().eq_ignore_ascii_case(to_crs.trim()) {
            Ok(Box::new(Identity))
        } else {
            Err(Error::Projection(format!(
                "no transform from '{}' to '{}'",
                from_crs, to_crs
            )))
        }
    }
}

/// Georeferenced position of a pixel location of `dataset`, expressed in `to_crs`
pub fn pixel_to_crs(
    service: &dyn ProjectionService,
    dataset: &Dataset,
    to_crs: &str,
    pixel_x: f64,
    pixel_y: f64,
) -> Result<(f64, f64)> {
    let geo_transform = dataset.geo_transform().ok_or_else(|| {
        Error::Projection(format!("'{}' has no geotransform", dataset.description()))
    })?;
    let from_crs = dataset.crs().ok_or_else(|| {
        Error::Projection(format!("'{}' has no coordinate reference system", dataset.description()))
    })?;
    let (x, y) = geo_transform.pixel_to_geo(pixel_x, pixel_y);
    service.transformer(&from_crs, to_crs)?.transform(x, y)
}
