use proj::Proj;

use crate::error::{Error, Result};

use super::{CoordinateTransform, ProjectionService};

/// Transforms backed by the PROJ library. Identifiers are anything PROJ accepts
/// as a CRS definition, e.g. `EPSG:4326` or a PROJ string.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProjProjection;

struct ProjTransform {
    proj: Proj,
}

impl CoordinateTransform for ProjTransform {
    fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        self.proj
            .convert((x, y))
            .map_err(|e| Error::Projection(format!("transformation failed: {}", e)))
    }
}

impl ProjectionService for ProjProjection {
    fn transformer(&self, from_crs: &str, to_crs: &str) -> Result<Box<dyn CoordinateTransform>> {
        let proj = Proj::new_known_crs(from_crs, to_crs, None).map_err(|e| {
            Error::Projection(format!(
                "failed to create transform from '{}' to '{}': {}",
                from_crs, to_crs, e
            ))
        })?;
        Ok(Box::new(ProjTransform { proj }))
    }
}
