//! Virtual rasters: JSON documents that mosaic windows of other datasets
//!
//! ```json
//! {
//!   "format": "virtual-raster",
//!   "width": 200, "height": 100,
//!   "block_size": [128, 128],
//!   "bands": [{
//!     "data_type": "U8",
//!     "no_data": 0,
//!     "sources": [
//!       { "path": "left.fgd", "band": 1, "dst_window": [0, 0, 100, 100] },
//!       { "path": "right.fgd", "src_window": [0, 0, 50, 50], "dst_window": [100, 0, 100, 100] }
//!     ]
//!   }]
//! }
//! ```
//!
//! The document is either the content of a file or the identifier itself.
//! Relative source paths resolve against the document's directory. Sources are
//! opened on first read, read-only, through the registry's shared open, so a
//! missing source only fails the reads that need it. Windows are resampled with
//! nearest neighbour; later sources overwrite earlier ones.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dataset::Dataset;
use crate::driver::{
    BandLayout, DatasetLayout, DetectionPriority, Driver, DriverRegistry, OpenContext, Probe,
    RasterSource,
};
use crate::error::{Error, Result};
use crate::io::OpenMode;
use crate::pixel;
use crate::types::{AccessMode, DataType, GeoTransform, Window};

pub const DRIVER_NAME: &str = "Virtual";
pub const FORMAT_MARKER: &str = "virtual-raster";

/// Deepest chain of virtual rasters read through one another
pub const MAX_NESTING: usize = 32;

const DEFAULT_BLOCK: usize = 128;

thread_local! {
    /// Virtual rasters whose blocks are being assembled on this thread
    static READ_STACK: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Entry on the thread's read stack, popped on drop
struct ReadGuard;

impl ReadGuard {
    fn enter(identifier: &str) -> Result<Self> {
        READ_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.len() >= MAX_NESTING {
                warn!(identifier, depth = stack.len(), "virtual raster nesting too deep");
                return Err(Error::Recursion(format!(
                    "'{}' nested more than {} levels deep",
                    identifier, MAX_NESTING
                )));
            }
            stack.push(identifier.to_string());
            Ok(ReadGuard)
        })
    }

    /// Fails if `identifier` is already being read further up this thread
    fn check(identifier: &str) -> Result<()> {
        READ_STACK.with(|stack| {
            if stack.borrow().iter().any(|s| s == identifier) {
                warn!(identifier, "virtual raster references itself");
                return Err(Error::Recursion(format!(
                    "'{}' is referenced by one of its own sources",
                    identifier
                )));
            }
            Ok(())
        })
    }
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        READ_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Document root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualDocument {
    pub format: String,
    pub width: usize,
    pub height: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_size: Option<[usize; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_transform: Option<[f64; 6]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,
    pub bands: Vec<VirtualBand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualBand {
    /// Data type name, e.g. `"I16"`
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_data: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub sources: Vec<VirtualSourceRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualSourceRef {
    pub path: String,
    #[serde(default = "first_band")]
    pub band: usize,
    /// `[x, y, width, height]` in the source; whole source when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_window: Option<[i64; 4]>,
    /// `[x, y, width, height]` in the virtual raster; same as `src_window` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_window: Option<[i64; 4]>,
}

fn first_band() -> usize {
    1
}

impl VirtualDocument {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            format: FORMAT_MARKER.to_string(),
            width,
            height,
            block_size: None,
            geo_transform: None,
            crs: None,
            bands: Vec::new(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn to_window(rect: [i64; 4], what: &str, identifier: &str) -> Result<Window> {
    let [x, y, w, h] = rect;
    if w <= 0 || h <= 0 {
        return Err(Error::malformed(
            identifier,
            format!("{} {:?} must have a positive size", what, rect),
        ));
    }
    Ok(Window::new(x, y, w as usize, h as usize))
}

/// One validated source reference
#[derive(Debug, Clone)]
struct SourceSpec {
    path: String,
    band: usize,
    src_window: Option<Window>,
    dst_window: Option<Window>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct VirtualDriver;

impl Driver for VirtualDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn description(&self) -> &str {
        "Virtual mosaic of other rasters"
    }

    fn extensions(&self) -> &[&str] {
        &["vrt", "json"]
    }

    fn identify(&self, probe: &Probe) -> bool {
        let text = if probe.is_inline() {
            probe.identifier.as_str()
        } else {
            probe.header_text()
        };
        text.trim_start().starts_with('{') && text.contains(FORMAT_MARKER)
    }

    fn open(&self, ctx: &OpenContext<'_>, probe: &Probe, mode: AccessMode) -> Result<Box<dyn RasterSource>> {
        if mode.is_writable() {
            return Err(Error::Unsupported(format!(
                "virtual raster '{}' is read-only",
                probe.identifier
            )));
        }

        let (text, base_dir) = if probe.is_inline() {
            (probe.identifier.clone(), None)
        } else {
            let handle = ctx.vfs().open(&probe.identifier, OpenMode::Read)?;
            let bytes = handle.read_at(0, handle.len()? as usize)?;
            let text = String::from_utf8(bytes)
                .map_err(|_| Error::malformed(&probe.identifier, "document is not UTF-8"))?;
            let base = Path::new(&probe.identifier)
                .parent()
                .map(|p| p.to_string_lossy().into_owned());
            (text, base)
        };

        let doc: VirtualDocument = serde_json::from_str(&text)
            .map_err(|e| Error::malformed(&probe.identifier, e.to_string()))?;
        let source = VirtualSource::from_document(ctx.registry(), &probe.identifier, doc, base_dir.as_deref())?;
        Ok(Box::new(source))
    }
}

fn resolve_path(path: &str, base_dir: Option<&str>) -> String {
    match base_dir {
        Some(base) if !base.is_empty() && !Path::new(path).is_absolute() => {
            Path::new(base).join(path).to_string_lossy().into_owned()
        }
        _ => path.to_string(),
    }
}

pub struct VirtualSource {
    identifier: String,
    registry: DriverRegistry,
    layout: DatasetLayout,
    sources: Vec<Vec<SourceSpec>>,
    opened: Mutex<HashMap<String, Arc<Dataset>>>,
}

impl VirtualSource {
    fn from_document(
        registry: &DriverRegistry,
        identifier: &str,
        doc: VirtualDocument,
        base_dir: Option<&str>,
    ) -> Result<Self> {
        if doc.format != FORMAT_MARKER {
            return Err(Error::malformed(
                identifier,
                format!("unexpected format '{}'", doc.format),
            ));
        }
        let [bw, bh] = doc.block_size.unwrap_or([DEFAULT_BLOCK, DEFAULT_BLOCK]);
        let (bw, bh) = (bw.min(doc.width).max(1), bh.min(doc.height).max(1));

        let mut bands = Vec::with_capacity(doc.bands.len());
        let mut sources = Vec::with_capacity(doc.bands.len());
        for (i, band) in doc.bands.into_iter().enumerate() {
            let data_type = DataType::from_name(&band.data_type).ok_or_else(|| {
                Error::malformed(
                    identifier,
                    format!("band {}: unknown data type '{}'", i + 1, band.data_type),
                )
            })?;
            let mut layout = BandLayout::new(data_type, bw, bh).with_no_data(band.no_data);
            layout.description = band.description.unwrap_or_default();
            bands.push(layout);

            let specs = band
                .sources
                .into_iter()
                .map(|s| {
                    if s.band == 0 {
                        return Err(Error::malformed(identifier, "source band numbers start at 1"));
                    }
                    Ok(SourceSpec {
                        path: resolve_path(&s.path, base_dir),
                        band: s.band,
                        src_window: s
                            .src_window
                            .map(|r| to_window(r, "src_window", identifier))
                            .transpose()?,
                        dst_window: s
                            .dst_window
                            .map(|r| to_window(r, "dst_window", identifier))
                            .transpose()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            sources.push(specs);
        }

        let mut layout = DatasetLayout::new(doc.width, doc.height, bands);
        layout.metadata.geo_transform = doc.geo_transform.map(GeoTransform);
        layout.metadata.crs = doc.crs;
        debug!(
            identifier,
            bands = layout.bands.len(),
            sources = sources.iter().map(Vec::len).sum::<usize>(),
            "parsed virtual raster"
        );

        Ok(Self {
            identifier: identifier.to_string(),
            registry: registry.clone(),
            layout,
            sources,
            opened: Mutex::new(HashMap::new()),
        })
    }

    fn dataset(&self, path: &str) -> Result<Arc<Dataset>> {
        ReadGuard::check(path)?;
        let mut opened = self.opened.lock();
        if let Some(ds) = opened.get(path) {
            return Ok(Arc::clone(ds));
        }
        let ds = self.registry.open_shared(path, AccessMode::ReadOnly)?;
        opened.insert(path.to_string(), Arc::clone(&ds));
        Ok(ds)
    }

    /// Copies the part of `source` that lands in `block`
    fn compose(
        &self,
        source: &SourceSpec,
        band_layout: &BandLayout,
        block: Window,
        buf: &mut [u8],
    ) -> Result<()> {
        let ds = self.dataset(&source.path)?;
        let src_band = ds.band(source.band)?;
        let (sw, sh) = src_band.size();

        let src = source
            .src_window
            .unwrap_or_else(|| Window::new(0, 0, sw, sh));
        let dst = source.dst_window.unwrap_or(src);

        // Destination pixels covered by this block
        let x_start = dst.x.max(block.x);
        let x_end = (dst.x + dst.width as i64).min(block.x + block.width as i64);
        let y_start = dst.y.max(block.y);
        let y_end = (dst.y + dst.height as i64).min(block.y + block.height as i64);
        if x_start >= x_end || y_start >= y_end {
            return Ok(());
        }

        let to_source = |p: i64, d0: i64, dn: usize, s0: i64, sn: usize| -> i64 {
            let offset = ((p - d0) as f64 + 0.5) * sn as f64 / dn as f64;
            s0 + (offset.floor() as i64).min(sn as i64 - 1)
        };
        let cols: Vec<i64> = (x_start..x_end)
            .map(|px| to_source(px, dst.x, dst.width, src.x, src.width))
            .collect();
        let rows: Vec<i64> = (y_start..y_end)
            .map(|py| to_source(py, dst.y, dst.height, src.y, src.height))
            .collect();

        let in_x = |sx: i64| sx >= 0 && (sx as usize) < sw;
        let in_y = |sy: i64| sy >= 0 && (sy as usize) < sh;
        let (Some(min_x), Some(max_x)) = (
            cols.iter().copied().filter(|&x| in_x(x)).min(),
            cols.iter().copied().filter(|&x| in_x(x)).max(),
        ) else {
            return Ok(());
        };
        let (Some(min_y), Some(max_y)) = (
            rows.iter().copied().filter(|&y| in_y(y)).min(),
            rows.iter().copied().filter(|&y| in_y(y)).max(),
        ) else {
            return Ok(());
        };

        let read = Window::new(
            min_x,
            min_y,
            (max_x - min_x + 1) as usize,
            (max_y - min_y + 1) as usize,
        );
        let mut values = vec![0f64; read.pixel_count()];
        src_band.read_window(read, &mut values)?;

        for (r, &sy) in rows.iter().enumerate() {
            if !in_y(sy) {
                continue;
            }
            let out_row = (y_start - block.y) as usize + r;
            for (c, &sx) in cols.iter().enumerate() {
                if !in_x(sx) {
                    continue;
                }
                let value = values[(sy - min_y) as usize * read.width + (sx - min_x) as usize];
                let out_col = (x_start - block.x) as usize + c;
                pixel::write_sample(
                    band_layout.data_type,
                    buf,
                    out_row * band_layout.block_width + out_col,
                    value,
                );
            }
        }
        Ok(())
    }
}

impl RasterSource for VirtualSource {
    fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    fn read_block(&self, band: usize, block_x: usize, block_y: usize, buf: &mut [u8]) -> Result<()> {
        let band_layout = self.layout.band(band).ok_or(Error::BandOutOfRange {
            index: band,
            count: self.layout.bands.len(),
        })?;
        let x0 = block_x * band_layout.block_width;
        let y0 = block_y * band_layout.block_height;
        if x0 >= self.layout.width || y0 >= self.layout.height {
            return Err(Error::InvalidArgument(format!(
                "block ({}, {}) outside the raster",
                block_x, block_y
            )));
        }
        let block = Window::new(
            x0 as i64,
            y0 as i64,
            band_layout.block_width.min(self.layout.width - x0),
            band_layout.block_height.min(self.layout.height - y0),
        );

        let _guard = ReadGuard::enter(&self.identifier)?;
        for source in &self.sources[band - 1] {
            self.compose(source, band_layout, block, buf)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::CreateSpec;

    fn registry() -> DriverRegistry {
        DriverRegistry::with_builtin_drivers(Default::default())
    }

    fn ramp(registry: &DriverRegistry, path: &str, width: usize, height: usize) {
        let ds = registry
            .create(path, "FlatGrid", &CreateSpec::new(width, height, 1, DataType::U8))
            .unwrap();
        let values: Vec<u8> = (0..width * height).map(|v| v as u8).collect();
        ds.band(1)
            .unwrap()
            .write_window(Window::new(0, 0, width, height), &values)
            .unwrap();
        ds.close().unwrap();
    }

    fn single_source(path: &str, src: Option<[i64; 4]>, dst: Option<[i64; 4]>) -> VirtualBand {
        VirtualBand {
            data_type: "U8".to_string(),
            no_data: None,
            description: None,
            sources: vec![VirtualSourceRef {
                path: path.to_string(),
                band: 1,
                src_window: src,
                dst_window: dst,
            }],
        }
    }

    #[test]
    fn test_identify() {
        let driver = VirtualDriver;
        let inline = r#"{"format": "virtual-raster", "width": 1, "height": 1, "bands": []}"#;
        assert!(driver.identify(&Probe::new(inline, Vec::new())));
        assert!(driver.identify(&Probe::new("/x/a.vrt", inline.as_bytes().to_vec())));
        assert!(!driver.identify(&Probe::new("/x/a.json", b"{\"name\": 1}".to_vec())));
    }

    #[test]
    fn test_relative_source_and_offset_window() {
        let registry = registry();
        ramp(&registry, "/vsimem/vrt/base.fgd", 4, 4);

        let mut doc = VirtualDocument::new(6, 4);
        doc.bands.push(single_source("base.fgd", Some([1, 1, 2, 2]), Some([4, 2, 2, 2])));
        registry
            .vfs()
            .write_mem_file("/vsimem/vrt/mosaic.vrt", doc.to_json().unwrap().into_bytes())
            .unwrap();

        let ds = registry.open("/vsimem/vrt/mosaic.vrt", AccessMode::ReadOnly).unwrap();
        assert_eq!(ds.driver_name(), DRIVER_NAME);
        let data = ds.band(1).unwrap().read_as::<u8>(Window::new(3, 2, 3, 2)).unwrap();
        assert_eq!(data.data, vec![0, 5, 6, 0, 9, 10]);
    }

    #[test]
    fn test_nearest_upsampling() {
        let registry = registry();
        ramp(&registry, "/vsimem/vrt/small.fgd", 2, 2);

        let mut doc = VirtualDocument::new(4, 4);
        doc.bands.push(single_source("/vsimem/vrt/small.fgd", None, Some([0, 0, 4, 4])));
        let ds = registry.open(&doc.to_json().unwrap(), AccessMode::ReadOnly).unwrap();

        let data = ds.band(1).unwrap().read_as::<u8>(Window::new(0, 0, 4, 4)).unwrap();
        assert_eq!(
            data.data,
            vec![0, 0, 1, 1, 0, 0, 1, 1, 2, 2, 3, 3, 2, 2, 3, 3]
        );
    }

    #[test]
    fn test_missing_source_fails_at_read() {
        let registry = registry();
        let mut doc = VirtualDocument::new(2, 2);
        doc.bands.push(single_source("/vsimem/vrt/absent.fgd", None, Some([0, 0, 2, 2])));
        let ds = registry.open(&doc.to_json().unwrap(), AccessMode::ReadOnly).unwrap();
        assert!(ds.band(1).unwrap().checksum().is_err());
    }

    #[test]
    fn test_invalid_windows_and_bands() {
        let registry = registry();
        let mut doc = VirtualDocument::new(2, 2);
        doc.bands.push(single_source("a.fgd", Some([0, 0, 0, 2]), None));
        assert!(matches!(
            registry.open(&doc.to_json().unwrap(), AccessMode::ReadOnly),
            Err(Error::MalformedSource { .. })
        ));

        ramp(&registry, "/vsimem/vrt/one.fgd", 2, 2);
        let mut doc = VirtualDocument::new(2, 2);
        let mut band = single_source("/vsimem/vrt/one.fgd", None, None);
        band.sources[0].band = 3;
        doc.bands.push(band);
        let ds = registry.open(&doc.to_json().unwrap(), AccessMode::ReadOnly).unwrap();
        let err = ds.band(1).unwrap().read_as::<u8>(Window::new(0, 0, 2, 2)).unwrap_err();
        assert!(err.to_string().contains("band"), "{}", err);
    }

    #[test]
    fn test_self_reference_is_recursion() {
        let registry = registry();
        let path = "/vsimem/vrt/loop.vrt";
        let mut doc = VirtualDocument::new(3, 3);
        doc.bands.push(single_source("loop.vrt", None, Some([0, 0, 3, 3])));
        registry
            .vfs()
            .write_mem_file(path, doc.to_json().unwrap().into_bytes())
            .unwrap();

        let ds = registry.open(path, AccessMode::ReadOnly).unwrap();
        let err = ds.band(1).unwrap().checksum().unwrap_err();
        assert!(matches!(err, Error::Block { ref source, .. } if matches!(**source, Error::Recursion(_))), "{}", err);
    }

    #[test]
    fn test_update_mode_rejected() {
        let registry = registry();
        let doc = VirtualDocument::new(1, 1);
        assert!(matches!(
            registry.open(&doc.to_json().unwrap(), AccessMode::Update),
            Err(Error::Unsupported(_))
        ));
    }
}
