//! Validity masks derived from no-data values

use bitflags::bitflags;

use crate::error::Result;
use crate::pixel::{self, Buffer};
use crate::types::Window;

use super::band::RasterBand;

/// Mask value of a valid pixel
pub const MASK_VALID: u8 = 255;

/// Mask value of a pixel without data
pub const MASK_INVALID: u8 = 0;

bitflags! {
    /// How the validity mask of a band is derived
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MaskFlags: u32 {
        /// Every pixel is valid
        const ALL_VALID = 0x01;
        /// The mask is shared by all bands
        const PER_DATASET = 0x02;
        /// The mask comes from an alpha band
        const ALPHA = 0x04;
        /// Pixels equal to the no-data value are invalid
        const NODATA = 0x08;
    }
}

impl RasterBand<'_> {
    pub fn mask_flags(&self) -> MaskFlags {
        match self.no_data_value() {
            Some(_) => MaskFlags::NODATA,
            None => MaskFlags::ALL_VALID,
        }
    }

    /// Mask of `window`: [`MASK_VALID`] for valid pixels, [`MASK_INVALID`] for
    /// no-data pixels and pixels outside the raster
    pub fn read_mask_window(&self, window: Window) -> Result<Buffer<u8>> {
        let geom = self.geometry()?;
        let mut values = vec![0f64; window.pixel_count()];
        self.read_window(window, &mut values)?;

        let no_data = geom.no_data.map(|v| pixel::clamp_to(geom.data_type, v));
        let mut mask = Buffer::zeroed((window.width, window.height));
        for (i, (out, value)) in mask.data.iter_mut().zip(&values).enumerate() {
            let x = window.x + (i % window.width) as i64;
            let y = window.y + (i / window.width) as i64;
            let inside = x >= 0 && y >= 0 && (x as usize) < geom.width && (y as usize) < geom.height;
            let valid = inside
                && match no_data {
                    Some(nd) if nd.is_nan() => !value.is_nan(),
                    Some(nd) => *value != nd,
                    None => true,
                };
            *out = if valid { MASK_VALID } else { MASK_INVALID };
        }
        Ok(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{CreateSpec, DriverRegistry};
    use crate::types::DataType;

    #[test]
    fn test_flags_follow_no_data() {
        let registry = DriverRegistry::with_builtin_drivers(Default::default());
        let ds = registry
            .create("mem", "MEM", &CreateSpec::new(2, 2, 1, DataType::U8))
            .unwrap();
        let band = ds.band(1).unwrap();
        assert_eq!(band.mask_flags(), MaskFlags::ALL_VALID);

        band.set_no_data_value(Some(0.0)).unwrap();
        assert_eq!(band.mask_flags(), MaskFlags::NODATA);
    }

    #[test]
    fn test_mask_window() {
        let registry = DriverRegistry::with_builtin_drivers(Default::default());
        let ds = registry
            .create("mem", "MEM", &CreateSpec::new(2, 2, 1, DataType::I16).with_no_data(-1.0))
            .unwrap();
        let band = ds.band(1).unwrap();
        band.write_window(Window::new(0, 0, 2, 2), &[1i16, -1, 3, 4]).unwrap();

        let mask = band.read_mask_window(Window::new(0, 0, 3, 2)).unwrap();
        assert_eq!(mask.data, vec![255, 0, 0, 255, 255, 0]);
    }

    #[test]
    fn test_all_valid_mask_outside_extent() {
        let registry = DriverRegistry::with_builtin_drivers(Default::default());
        let ds = registry
            .create("mem", "MEM", &CreateSpec::new(2, 1, 1, DataType::U8))
            .unwrap();
        let mask = ds.band(1).unwrap().read_mask_window(Window::new(-1, 0, 3, 1)).unwrap();
        assert_eq!(mask.data, vec![0, 255, 255]);
    }
}
