//! Dataset geometry as reported by drivers and requested by callers

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::types::{ColorInterp, DataType, GeoTransform};

/// Name of the default metadata domain
pub const DEFAULT_DOMAIN: &str = "";

/// Per-band layout
#[derive(Debug, Clone, PartialEq)]
pub struct BandLayout {
    pub data_type: DataType,
    pub block_width: usize,
    pub block_height: usize,
    pub no_data: Option<f64>,
    pub color_interp: ColorInterp,
    pub description: String,
    /// Band-level key/value metadata (default domain)
    pub metadata: BTreeMap<String, String>,
}

impl BandLayout {
    pub fn new(data_type: DataType, block_width: usize, block_height: usize) -> Self {
        Self {
            data_type,
            block_width,
            block_height,
            no_data: None,
            color_interp: ColorInterp::Undefined,
            description: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_no_data(mut self, no_data: Option<f64>) -> Self {
        self.no_data = no_data;
        self
    }

    /// Size in bytes of one decoded block
    pub fn block_bytes(&self) -> usize {
        self.block_width * self.block_height * self.data_type.size()
    }

    /// Number of blocks along x and y for a raster of the given size
    pub fn block_grid(&self, width: usize, height: usize) -> (usize, usize) {
        (
            width.div_ceil(self.block_width),
            height.div_ceil(self.block_height),
        )
    }
}

/// Dataset-wide metadata and georeferencing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetMetadata {
    pub geo_transform: Option<GeoTransform>,
    /// Opaque coordinate reference identifier
    pub crs: Option<String>,
    /// Key/value metadata by domain, the default domain being `""`
    pub domains: BTreeMap<String, BTreeMap<String, String>>,
}

impl DatasetMetadata {
    pub fn item(&self, domain: &str, key: &str) -> Option<&str> {
        self.domains
            .get(domain)
            .and_then(|items| items.get(key))
            .map(String::as_str)
    }

    pub fn set_item(&mut self, domain: &str, key: &str, value: &str) {
        self.domains
            .entry(domain.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }
}

/// Everything a driver reports when a dataset is opened or created
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetLayout {
    pub width: usize,
    pub height: usize,
    pub bands: Vec<BandLayout>,
    pub metadata: DatasetMetadata,
}

impl DatasetLayout {
    pub fn new(width: usize, height: usize, bands: Vec<BandLayout>) -> Self {
        Self {
            width,
            height,
            bands,
            metadata: DatasetMetadata::default(),
        }
    }

    /// 1-based band lookup
    pub fn band(&self, index: usize) -> Option<&BandLayout> {
        index.checked_sub(1).and_then(|i| self.bands.get(i))
    }

    /// Rejects geometry no dataset can be built on
    pub fn validate(&self, identifier: &str) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::malformed(
                identifier,
                format!("non-positive raster size {}x{}", self.width, self.height),
            ));
        }
        if self.bands.is_empty() {
            return Err(Error::malformed(identifier, "dataset has no bands"));
        }
        for (i, band) in self.bands.iter().enumerate() {
            if band.block_width == 0 || band.block_height == 0 {
                return Err(Error::malformed(
                    identifier,
                    format!(
                        "band {} has non-positive block size {}x{}",
                        i + 1,
                        band.block_width,
                        band.block_height
                    ),
                ));
            }
            if band.block_width > self.width || band.block_height > self.height {
                return Err(Error::malformed(
                    identifier,
                    format!(
                        "band {} block size {}x{} exceeds the {}x{} raster",
                        i + 1,
                        band.block_width,
                        band.block_height,
                        self.width,
                        self.height
                    ),
                ));
            }
            band.block_width
                .checked_mul(band.block_height)
                .and_then(|n| n.checked_mul(band.data_type.size()))
                .filter(|n| *n <= isize::MAX as usize)
                .ok_or_else(|| Error::malformed(identifier, format!("band {} block is too large", i + 1)))?;
        }
        Ok(())
    }
}

/// Requested layout of one band of a new dataset
#[derive(Debug, Clone, PartialEq)]
pub struct BandSpec {
    pub data_type: DataType,
    /// Block size; drivers pick their own default when `None`
    pub block_size: Option<(usize, usize)>,
    pub no_data: Option<f64>,
}

impl BandSpec {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            block_size: None,
            no_data: None,
        }
    }
}

/// Arguments of a create call
#[derive(Debug, Clone, PartialEq)]
pub struct CreateSpec {
    pub width: usize,
    pub height: usize,
    pub bands: Vec<BandSpec>,
    pub geo_transform: Option<GeoTransform>,
    pub crs: Option<String>,
}

impl CreateSpec {
    /// `band_count` bands of the same type
    pub fn new(width: usize, height: usize, band_count: usize, data_type: DataType) -> Self {
        Self {
            width,
            height,
            bands: vec![BandSpec::new(data_type); band_count],
            geo_transform: None,
            crs: None,
        }
    }

    pub fn with_block_size(mut self, block_width: usize, block_height: usize) -> Self {
        for band in &mut self.bands {
            band.block_size = Some((block_width, block_height));
        }
        self
    }

    pub fn with_no_data(mut self, no_data: f64) -> Self {
        for band in &mut self.bands {
            band.no_data = Some(no_data);
        }
        self
    }

    pub fn with_geo_transform(mut self, geo_transform: GeoTransform) -> Self {
        self.geo_transform = Some(geo_transform);
        self
    }

    pub fn with_crs(mut self, crs: impl Into<String>) -> Self {
        self.crs = Some(crs.into());
        self
    }

    /// Builds the layout a driver reports back, using `default_block` for bands
    /// without an explicit block size. Block sizes are capped at the raster size.
    pub fn to_layout(&self, default_block: (usize, usize)) -> DatasetLayout {
        let bands = self
            .bands
            .iter()
            .map(|spec| {
                let (bw, bh) = spec.block_size.unwrap_or(default_block);
                BandLayout::new(spec.data_type, bw.min(self.width), bh.min(self.height))
                    .with_no_data(spec.no_data)
            })
            .collect();

        let mut layout = DatasetLayout::new(self.width, self.height, bands);
        layout.metadata.geo_transform = self.geo_transform;
        layout.metadata.crs = self.crs.clone();
        layout
    }

    pub fn validate(&self, identifier: &str) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.bands.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "cannot create '{}' with size {}x{} and {} bands",
                identifier,
                self.width,
                self.height,
                self.bands.len()
            )));
        }
        if let Some(band) = self
            .bands
            .iter()
            .find(|b| matches!(b.block_size, Some((w, h)) if w == 0 || h == 0))
        {
            return Err(Error::InvalidArgument(format!(
                "non-positive block size {:?}",
                band.block_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_grid_rounds_up() {
        let band = BandLayout::new(DataType::U16, 256, 256);
        assert_eq!(band.block_grid(1024, 1000), (4, 4));
        assert_eq!(band.block_grid(257, 1), (2, 1));
        assert_eq!(band.block_bytes(), 256 * 256 * 2);
    }

    #[test]
    fn test_validate_rejects_bad_geometry() {
        let ok = DatasetLayout::new(10, 10, vec![BandLayout::new(DataType::U8, 10, 1)]);
        assert!(ok.validate("a").is_ok());

        let no_bands = DatasetLayout::new(10, 10, vec![]);
        assert!(matches!(no_bands.validate("a"), Err(Error::MalformedSource { .. })));

        let empty = DatasetLayout::new(0, 10, vec![BandLayout::new(DataType::U8, 1, 1)]);
        assert!(empty.validate("a").is_err());

        let zero_block = DatasetLayout::new(10, 10, vec![BandLayout::new(DataType::U8, 0, 1)]);
        assert!(zero_block.validate("a").is_err());

        let oversized = DatasetLayout::new(4, 4, vec![BandLayout::new(DataType::U8, 4, u32::MAX as usize)]);
        assert!(matches!(oversized.validate("a"), Err(Error::MalformedSource { .. })));
    }

    #[test]
    fn test_band_lookup_is_one_based() {
        let layout = DatasetLayout::new(1, 1, vec![BandLayout::new(DataType::U8, 1, 1)]);
        assert!(layout.band(0).is_none());
        assert!(layout.band(1).is_some());
        assert!(layout.band(2).is_none());
    }

    #[test]
    fn test_create_spec_to_layout() {
        let spec = CreateSpec::new(100, 50, 2, DataType::F32)
            .with_no_data(-9999.0)
            .with_crs("EPSG:4326");
        let layout = spec.to_layout((256, 256));

        assert_eq!(layout.bands.len(), 2);
        assert_eq!(layout.bands[0].block_width, 100);
        assert_eq!(layout.bands[0].block_height, 50);
        assert_eq!(layout.bands[1].no_data, Some(-9999.0));
        assert_eq!(layout.metadata.crs.as_deref(), Some("EPSG:4326"));
    }

    #[test]
    fn test_create_spec_validation() {
        assert!(CreateSpec::new(0, 1, 1, DataType::U8).validate("x").is_err());
        assert!(CreateSpec::new(1, 1, 0, DataType::U8).validate("x").is_err());
        assert!(CreateSpec::new(4, 4, 1, DataType::U8)
            .with_block_size(0, 2)
            .validate("x")
            .is_err());
    }

    #[test]
    fn test_metadata_items() {
        let mut md = DatasetMetadata::default();
        assert_eq!(md.item(DEFAULT_DOMAIN, "AREA_OR_POINT"), None);
        md.set_item(DEFAULT_DOMAIN, "AREA_OR_POINT", "Area");
        assert_eq!(md.item(DEFAULT_DOMAIN, "AREA_OR_POINT"), Some("Area"));
        assert_eq!(md.item("IMAGE_STRUCTURE", "AREA_OR_POINT"), None);
    }
}
