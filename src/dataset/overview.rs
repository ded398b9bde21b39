//! Reduced-resolution overviews
//!
//! Overviews are in-memory datasets created through the owning registry, so their
//! blocks live in the same cache as the full-resolution data.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::info;

use crate::driver::{BandSpec, CreateSpec};
use crate::error::{Error, Result};
use crate::pixel;
use crate::types::Window;

use super::access::BandGeometry;
use super::dataset::Dataset;

/// Downsampling method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resampling {
    /// Pixel nearest to the center of each output cell
    Nearest,
    /// Mean of the valid pixels of each output cell
    Average,
}

impl Dataset {
    /// Builds one overview per reduction factor, replacing existing overviews.
    /// Factors must be at least 2; they are applied in ascending order.
    pub fn build_overviews(&self, factors: &[usize], resampling: Resampling) -> Result<()> {
        let mut factors = factors.to_vec();
        factors.sort_unstable();
        factors.dedup();
        if let Some(bad) = factors.iter().find(|f| **f < 2) {
            return Err(Error::InvalidArgument(format!(
                "overview factor {} must be at least 2",
                bad
            )));
        }

        let mut overviews = Vec::with_capacity(factors.len());
        for factor in factors {
            overviews.push(Arc::new(self.build_overview(factor, resampling)?));
        }
        info!(
            dataset = %self.description(),
            count = overviews.len(),
            ?resampling,
            "built overviews"
        );
        self.set_overviews(overviews);
        Ok(())
    }

    fn build_overview(&self, factor: usize, resampling: Resampling) -> Result<Dataset> {
        let (width, height) = self.raster_size();
        let out_width = width.div_ceil(factor);
        let out_height = height.div_ceil(factor);

        let geoms: Vec<BandGeometry> = (1..=self.raster_count())
            .map(|band| self.core().geometry(band))
            .collect::<Result<_>>()?;

        let spec = CreateSpec {
            width: out_width,
            height: out_height,
            bands: geoms
                .iter()
                .map(|g| BandSpec {
                    data_type: g.data_type,
                    block_size: Some((g.block_width, g.block_height)),
                    no_data: g.no_data,
                })
                .collect(),
            geo_transform: self
                .geo_transform()
                .map(|gt| gt.scaled(factor as f64, factor as f64)),
            crs: self.crs(),
        };
        let name = format!("{}#overview{}", self.description(), factor);
        let overview = self.registry().create(&name, "MEM", &spec)?;

        geoms.par_iter().try_for_each(|geom| {
            self.downsample_band(&overview, geom, factor, resampling)
        })?;
        Ok(overview)
    }

    /// Fills one overview band, one output row at a time
    fn downsample_band(
        &self,
        overview: &Dataset,
        geom: &BandGeometry,
        factor: usize,
        resampling: Resampling,
    ) -> Result<()> {
        let source = self.band(geom.band)?;
        let target = overview.band(geom.band)?;
        let (out_width, out_height) = overview.raster_size();
        let no_data = geom.no_data.map(|v| pixel::clamp_to(geom.data_type, v));

        let mut strip = vec![0f64; geom.width * factor];
        let mut row = vec![0f64; out_width];

        for oy in 0..out_height {
            let y0 = oy * factor;
            let rows = factor.min(geom.height - y0);
            let strip = &mut strip[..geom.width * rows];
            source.read_window(Window::new(0, y0 as i64, geom.width, rows), strip)?;

            for (ox, out) in row.iter_mut().enumerate() {
                let x0 = ox * factor;
                let cols = factor.min(geom.width - x0);
                *out = match resampling {
                    Resampling::Nearest => {
                        let cx = x0 + cols / 2;
                        let cy = rows / 2;
                        strip[cy * geom.width + cx]
                    }
                    Resampling::Average => {
                        let mut sum = 0.0;
                        let mut count = 0usize;
                        for r in 0..rows {
                            for &v in &strip[r * geom.width + x0..r * geom.width + x0 + cols] {
                                if no_data.is_some_and(|nd| nd == v) || v.is_nan() {
                                    continue;
                                }
                                sum += v;
                                count += 1;
                            }
                        }
                        if count == 0 {
                            geom.fill_value()
                        } else {
                            sum / count as f64
                        }
                    }
                };
            }
            target.write_window(Window::new(0, oy as i64, out_width, 1), &row)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverRegistry;
    use crate::types::{DataType, GeoTransform};

    fn source(registry: &DriverRegistry) -> Dataset {
        let ds = registry
            .create(
                "mem",
                "MEM",
                &CreateSpec::new(4, 4, 2, DataType::U8)
                    .with_geo_transform(GeoTransform::north_up(100.0, 200.0, 10.0, 10.0)),
            )
            .unwrap();
        let values: Vec<u8> = (0..16).collect();
        for band in ds.bands() {
            band.write_window(Window::new(0, 0, 4, 4), &values).unwrap();
        }
        ds
    }

    #[test]
    fn test_average_overview() {
        let registry = DriverRegistry::with_builtin_drivers(Default::default());
        let ds = source(&registry);
        ds.build_overviews(&[2], Resampling::Average).unwrap();

        assert_eq!(ds.overview_count(), 1);
        let ovr = ds.overview(0).unwrap();
        assert_eq!(ovr.raster_size(), (2, 2));
        assert_eq!(ovr.raster_count(), 2);

        // (0+1+4+5)/4 = 2.5 rounds to 3
        let data = ovr.band(2).unwrap().read_as::<u8>(Window::new(0, 0, 2, 2)).unwrap();
        assert_eq!(data.data, vec![3, 5, 11, 13]);

        let gt = ovr.geo_transform().unwrap();
        assert_eq!(gt.0[1], 20.0);
        assert_eq!(gt.0[5], -20.0);
    }

    #[test]
    fn test_nearest_overview_with_ragged_edge() {
        let registry = DriverRegistry::with_builtin_drivers(Default::default());
        let ds = source(&registry);
        ds.build_overviews(&[3, 2], Resampling::Nearest).unwrap();
        assert_eq!(ds.overview_count(), 2);

        let ovr = ds.overview(1).unwrap();
        assert_eq!(ovr.raster_size(), (2, 2));
        // Cells of 3x3 and a 1-pixel remainder
        let data = ovr.band(1).unwrap().read_as::<u8>(Window::new(0, 0, 2, 2)).unwrap();
        assert_eq!(data.data, vec![5, 7, 13, 15]);
    }

    #[test]
    fn test_invalid_factor() {
        let registry = DriverRegistry::with_builtin_drivers(Default::default());
        let ds = source(&registry);
        assert!(ds.build_overviews(&[1], Resampling::Nearest).is_err());
        assert_eq!(ds.overview_count(), 0);
        assert!(ds.overview(0).is_none());
    }
}
