//! Band checksums and statistics

use rayon::prelude::*;
use tracing::debug;

use crate::error::{Error, Result};
use crate::pixel;
use crate::types::Window;

use super::band::RasterBand;

pub const STATISTICS_MINIMUM: &str = "STATISTICS_MINIMUM";
pub const STATISTICS_MAXIMUM: &str = "STATISTICS_MAXIMUM";
pub const STATISTICS_MEAN: &str = "STATISTICS_MEAN";
pub const STATISTICS_STDDEV: &str = "STATISTICS_STDDEV";

const CHECKSUM_PRIMES: [i64; 11] = [7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43];

/// Summary statistics of the valid pixels of a band
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    min: f64,
    max: f64,
    sum: f64,
    sum_sq: f64,
    count: u64,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
            sum_sq: 0.0,
            count: 0,
        }
    }
}

impl Accumulator {
    fn add(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.sum_sq += value * value;
        self.count += 1;
    }

    fn merge(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            sum: self.sum + other.sum,
            sum_sq: self.sum_sq + other.sum_sq,
            count: self.count + other.count,
        }
    }

    fn finish(self) -> Option<Statistics> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        let variance = (self.sum_sq / n - mean * mean).max(0.0);
        Some(Statistics {
            min: self.min,
            max: self.max,
            mean,
            std_dev: variance.sqrt(),
        })
    }
}

/// Integer value a sample contributes to the checksum
fn checksum_value(value: f64) -> i64 {
    if value.is_nan() {
        return 0;
    }
    value.floor().clamp(i32::MIN as f64, i32::MAX as f64) as i64
}

impl RasterBand<'_> {
    /// 16-bit checksum of the whole band
    pub fn checksum(&self) -> Result<u16> {
        let (width, height) = self.size();
        self.checksum_window(Window::new(0, 0, width, height))
    }

    /// 16-bit checksum of `window`: every sample, taken as an integer, is reduced
    /// modulo a rotating sequence of small primes and summed into 16 bits.
    /// Identical content gives identical checksums across types and block sizes.
    pub fn checksum_window(&self, window: Window) -> Result<u16> {
        let mut line = vec![0f64; window.width];
        let mut checksum: i64 = 0;
        let mut prime = 0usize;

        for row in 0..window.height {
            let line_window = Window::new(window.x, window.y + row as i64, window.width, 1);
            self.read_window(line_window, &mut line)?;
            for &value in &line {
                checksum += checksum_value(value) % CHECKSUM_PRIMES[prime];
                prime = (prime + 1) % CHECKSUM_PRIMES.len();
                checksum &= 0xffff;
            }
        }
        Ok(checksum as u16)
    }

    /// Min/max/mean/standard deviation over pixels that are not no-data, computed
    /// one block row per task. The result is also stored as band metadata.
    pub fn compute_statistics(&self) -> Result<Statistics> {
        let geom = self.geometry()?;
        let no_data = geom.no_data.map(|v| pixel::clamp_to(geom.data_type, v));

        let total = (0..geom.blocks_y())
            .into_par_iter()
            .map(|block_y| -> Result<Accumulator> {
                let y0 = block_y * geom.block_height;
                let rows = geom.block_height.min(geom.height - y0);
                let window = Window::new(0, y0 as i64, geom.width, rows);
                let mut strip = vec![0f64; window.pixel_count()];
                self.read_window(window, &mut strip)?;

                let mut acc = Accumulator::default();
                for value in strip {
                    let is_no_data = match no_data {
                        Some(nd) if nd.is_nan() => value.is_nan(),
                        Some(nd) => value == nd,
                        None => false,
                    };
                    if !is_no_data && !value.is_nan() {
                        acc.add(value);
                    }
                }
                Ok(acc)
            })
            .try_reduce(Accumulator::default, |a, b| Ok(a.merge(b)))?;

        let stats = total.finish().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "band {} of '{}' has no valid pixels",
                self.index(),
                self.dataset().description()
            ))
        })?;

        let index = self.index() - 1;
        self.dataset().core().annotate(|layout| {
            let band = &mut layout.bands[index];
            for (key, value) in [
                (STATISTICS_MINIMUM, stats.min),
                (STATISTICS_MAXIMUM, stats.max),
                (STATISTICS_MEAN, stats.mean),
                (STATISTICS_STDDEV, stats.std_dev),
            ] {
                band.metadata.insert(key.to_string(), value.to_string());
            }
        });
        debug!(band = self.index(), ?stats, "computed statistics");
        Ok(stats)
    }

    /// Statistics previously stored in band metadata, if complete
    pub fn statistics(&self) -> Option<Statistics> {
        let get = |key: &str| self.metadata_item(key)?.parse::<f64>().ok();
        Some(Statistics {
            min: get(STATISTICS_MINIMUM)?,
            max: get(STATISTICS_MAXIMUM)?,
            mean: get(STATISTICS_MEAN)?,
            std_dev: get(STATISTICS_STDDEV)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{CreateSpec, DriverRegistry};
    use crate::types::DataType;

    #[test]
    fn test_checksum_value() {
        assert_eq!(checksum_value(3.7), 3);
        assert_eq!(checksum_value(-0.5), -1);
        assert_eq!(checksum_value(f64::NAN), 0);
        assert_eq!(checksum_value(1e12), i32::MAX as i64);
    }

    #[test]
    fn test_checksum_of_constant_band() {
        let registry = DriverRegistry::with_builtin_drivers(Default::default());
        let ds = registry
            .create("mem", "MEM", &CreateSpec::new(3, 2, 1, DataType::U8))
            .unwrap();
        let band = ds.band(1).unwrap();
        assert_eq!(band.checksum().unwrap(), 0);

        band.fill(10.0).unwrap();
        // 10 mod 7, 11, 13, 17, 19, 23
        assert_eq!(band.checksum().unwrap(), 3 + 10 * 5);
    }

    #[test]
    fn test_checksum_independent_of_layout() {
        let registry = DriverRegistry::with_builtin_drivers(Default::default());
        let values: Vec<i32> = (0..100).map(|v| v * 37 % 251).collect();

        let mut sums = Vec::new();
        for (dt, block) in [(DataType::I32, (10, 1)), (DataType::F64, (3, 7))] {
            let ds = registry
                .create(
                    "mem",
                    "MEM",
                    &CreateSpec::new(10, 10, 1, dt).with_block_size(block.0, block.1),
                )
                .unwrap();
            let band = ds.band(1).unwrap();
            band.write_window(Window::new(0, 0, 10, 10), &values).unwrap();
            sums.push(band.checksum().unwrap());
        }
        assert_eq!(sums[0], sums[1]);
    }

    #[test]
    fn test_statistics_skip_no_data() {
        let registry = DriverRegistry::with_builtin_drivers(Default::default());
        let ds = registry
            .create(
                "mem",
                "MEM",
                &CreateSpec::new(4, 3, 1, DataType::F32)
                    .with_no_data(-9999.0)
                    .with_block_size(4, 1),
            )
            .unwrap();
        let band = ds.band(1).unwrap();
        band.fill(-9999.0).unwrap();
        band.write_window(Window::new(0, 1, 4, 1), &[2.0f32, 4.0, 4.0, 6.0]).unwrap();

        let stats = band.compute_statistics().unwrap();
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 6.0);
        assert_eq!(stats.mean, 4.0);
        assert!((stats.std_dev - 2f64.sqrt()).abs() < 1e-12);

        assert_eq!(band.statistics(), Some(stats));
        assert_eq!(band.metadata_item(STATISTICS_MAXIMUM).as_deref(), Some("6"));
    }

    #[test]
    fn test_statistics_all_no_data() {
        let registry = DriverRegistry::with_builtin_drivers(Default::default());
        let ds = registry
            .create("mem", "MEM", &CreateSpec::new(2, 2, 1, DataType::U8).with_no_data(0.0))
            .unwrap();
        assert!(ds.band(1).unwrap().compute_statistics().is_err());
        assert_eq!(ds.band(1).unwrap().statistics(), None);
    }
}
