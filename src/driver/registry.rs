//! Driver registry: identification and open/create dispatch
//!
//! A registry is assembled once with [`DriverRegistryBuilder`] and is immutable
//! afterwards. Clones share the driver list, the virtual file system, the block
//! cache and the open-dataset bookkeeping.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::{debug, info};

use crate::cache::{BlockCache, DatasetId};
use crate::config::EngineConfig;
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::io::Vfs;
use crate::types::AccessMode;

use super::layout::CreateSpec;
use super::probe::Probe;
use super::traits::{Driver, OpenContext};

/// Bookkeeping entry for one open dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRecord {
    pub id: DatasetId,
    pub identifier: String,
    pub driver: String,
    pub mode: AccessMode,
}

/// Collects drivers and shared resources before building a [`DriverRegistry`]
#[derive(Default)]
pub struct DriverRegistryBuilder {
    drivers: Vec<Arc<dyn Driver>>,
    config: EngineConfig,
    vfs: Option<Vfs>,
    cache: Option<Arc<BlockCache>>,
}

impl DriverRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses an existing file system instead of a fresh one
    pub fn vfs(mut self, vfs: Vfs) -> Self {
        self.vfs = Some(vfs);
        self
    }

    /// Shares an existing block cache instead of creating one from the config
    pub fn cache(mut self, cache: Arc<BlockCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Appends a driver. Registration order breaks ties between equal priorities.
    pub fn register<D: Driver + 'static>(self, driver: D) -> Self {
        self.register_arc(Arc::new(driver))
    }

    pub fn register_arc(mut self, driver: Arc<dyn Driver>) -> Self {
        debug!(driver = driver.name(), priority = ?driver.priority(), "registering driver");
        self.drivers.push(driver);
        self
    }

    pub fn build(self) -> DriverRegistry {
        let mut drivers = self.drivers;
        // Stable: registration order survives within a priority class
        drivers.sort_by_key(|d| d.priority());

        let vfs = self
            .vfs
            .unwrap_or_else(|| Vfs::new(self.config.vfs.clone()));
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(BlockCache::new(&self.config.cache)));

        DriverRegistry {
            inner: Arc::new(RegistryInner {
                drivers,
                vfs,
                cache,
                config: self.config,
                open: DashMap::new(),
                shared: DashMap::new(),
            }),
        }
    }
}

struct RegistryInner {
    drivers: Vec<Arc<dyn Driver>>,
    vfs: Vfs,
    cache: Arc<BlockCache>,
    config: EngineConfig,
    open: DashMap<DatasetId, OpenRecord>,
    shared: DashMap<(String, AccessMode), Weak<Dataset>>,
}

/// Ordered set of drivers plus the resources datasets share
#[derive(Clone)]
pub struct DriverRegistry {
    inner: Arc<RegistryInner>,
}

impl DriverRegistry {
    pub fn builder() -> DriverRegistryBuilder {
        DriverRegistryBuilder::new()
    }

    /// Registry with every driver shipped in this crate
    pub fn with_builtin_drivers(config: EngineConfig) -> Self {
        crate::drivers::register_builtin(Self::builder().config(config)).build()
    }

    pub fn drivers(&self) -> &[Arc<dyn Driver>] {
        &self.inner.drivers
    }

    /// Case-insensitive lookup by driver name
    pub fn driver_by_name(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.inner
            .drivers
            .iter()
            .find(|d| d.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn vfs(&self) -> &Vfs {
        &self.inner.vfs
    }

    pub fn cache(&self) -> &Arc<BlockCache> {
        &self.inner.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Reads the identification prefix. Sources that cannot be opened as files
    /// (inline documents, missing paths) get an empty header plus the error.
    fn probe(&self, identifier: &str) -> (Probe, Option<Error>) {
        match self.inner.vfs.read_prefix(identifier, self.inner.config.probe_bytes) {
            Ok(header) => (Probe::new(identifier, header), None),
            Err(e) => (Probe::new(identifier, Vec::new()), Some(e)),
        }
    }

    fn first_match(&self, probe: &Probe) -> Option<Arc<dyn Driver>> {
        self.inner
            .drivers
            .iter()
            .find(|d| d.identify(probe))
            .cloned()
    }

    /// First driver, in priority then registration order, that recognises the source
    pub fn identify(&self, identifier: &str) -> Option<Arc<dyn Driver>> {
        let (probe, _) = self.probe(identifier);
        let driver = self.first_match(&probe);
        debug!(
            identifier,
            driver = driver.as_ref().map(|d| d.name()),
            "identified source"
        );
        driver
    }

    /// Identifies `identifier` and opens it with the matching driver
    pub fn open(&self, identifier: &str, mode: AccessMode) -> Result<Dataset> {
        let (probe, probe_error) = self.probe(identifier);
        let driver = match self.first_match(&probe) {
            Some(driver) => driver,
            None => {
                return Err(probe_error
                    .unwrap_or_else(|| Error::FormatNotRecognized(identifier.to_string())))
            }
        };
        self.open_probed(driver, &probe, mode)
    }

    /// Opens `identifier` with a named driver, bypassing identification
    pub fn open_with_driver(
        &self,
        identifier: &str,
        driver_name: &str,
        mode: AccessMode,
    ) -> Result<Dataset> {
        let driver = self
            .driver_by_name(driver_name)
            .ok_or_else(|| Error::UnknownDriver(driver_name.to_string()))?;
        let (probe, _) = self.probe(identifier);
        self.open_probed(driver, &probe, mode)
    }

    fn open_probed(&self, driver: Arc<dyn Driver>, probe: &Probe, mode: AccessMode) -> Result<Dataset> {
        let ctx = OpenContext::new(self);
        let source = driver.open(&ctx, probe, mode)?;
        let dataset = Dataset::from_source(self.clone(), source, &probe.identifier, driver.name(), mode)?;
        info!(
            identifier = %probe.identifier,
            driver = driver.name(),
            ?mode,
            id = %dataset.id(),
            "opened dataset"
        );
        Ok(dataset)
    }

    /// Returns the dataset already opened through this call for the same
    /// identifier and mode, or opens it. Shared datasets share cache entries.
    pub fn open_shared(&self, identifier: &str, mode: AccessMode) -> Result<Arc<Dataset>> {
        let key = (identifier.to_string(), mode);
        if let Some(existing) = self.inner.shared.get(&key).and_then(|w| w.upgrade()) {
            return Ok(existing);
        }

        let opened = Arc::new(self.open(identifier, mode)?);

        // Another thread may have won the race while the lock was not held
        let mut entry = self.inner.shared.entry(key).or_insert_with(Weak::new);
        if let Some(existing) = entry.upgrade() {
            return Ok(existing);
        }
        *entry = Arc::downgrade(&opened);
        drop(entry);

        self.inner.shared.retain(|_, w| w.strong_count() > 0);
        Ok(opened)
    }

    /// Creates a new dataset at `path` with the named driver
    pub fn create(&self, path: &str, driver_name: &str, spec: &CreateSpec) -> Result<Dataset> {
        let driver = self
            .driver_by_name(driver_name)
            .ok_or_else(|| Error::UnknownDriver(driver_name.to_string()))?;
        if !driver.can_create() {
            return Err(Error::Unsupported(format!(
                "driver {} cannot create datasets",
                driver.name()
            )));
        }
        spec.validate(path)?;

        let ctx = OpenContext::new(self);
        let source = driver.create(&ctx, path, spec)?;
        let dataset = Dataset::from_source(self.clone(), source, path, driver.name(), AccessMode::Update)?;
        info!(path, driver = driver.name(), id = %dataset.id(), "created dataset");
        Ok(dataset)
    }

    /// Snapshot of every dataset currently open through this registry
    pub fn open_datasets(&self) -> Vec<OpenRecord> {
        let mut records: Vec<OpenRecord> =
            self.inner.open.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.id);
        records
    }

    pub fn is_open(&self, id: DatasetId) -> bool {
        self.inner.open.contains_key(&id)
    }

    pub(crate) fn record_open(&self, record: OpenRecord) {
        self.inner.open.insert(record.id, record);
    }

    pub(crate) fn forget(&self, id: DatasetId) {
        self.inner.open.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{BandLayout, DatasetLayout, DetectionPriority, RasterSource};
    use crate::types::DataType;

    struct StaticSource {
        layout: DatasetLayout,
    }

    impl RasterSource for StaticSource {
        fn layout(&self) -> &DatasetLayout {
            &self.layout
        }

        fn read_block(&self, _band: usize, _x: usize, _y: usize, buf: &mut [u8]) -> Result<()> {
            buf.fill(1);
            Ok(())
        }
    }

    struct MagicDriver {
        name: &'static str,
        magic: &'static [u8],
        priority: DetectionPriority,
        width: usize,
    }

    impl Driver for MagicDriver {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> DetectionPriority {
            self.priority
        }

        fn identify(&self, probe: &Probe) -> bool {
            probe.starts_with(self.magic)
        }

        fn open(&self, _ctx: &OpenContext<'_>, _probe: &Probe, _mode: AccessMode) -> Result<Box<dyn RasterSource>> {
            Ok(Box::new(StaticSource {
                layout: DatasetLayout::new(self.width, 4, vec![BandLayout::new(DataType::U8, 4, 4)]),
            }))
        }
    }

    fn driver(name: &'static str, magic: &'static [u8], priority: DetectionPriority) -> MagicDriver {
        MagicDriver {
            name,
            magic,
            priority,
            width: 4,
        }
    }

    #[test]
    fn test_registration_order_and_priority() {
        let registry = DriverRegistry::builder()
            .register(driver("A", b"", DetectionPriority::Fallback))
            .register(driver("B", b"AB", DetectionPriority::Normal))
            .register(driver("C", b"A", DetectionPriority::Normal))
            .register(driver("D", b"ABC", DetectionPriority::Signature))
            .build();

        let names: Vec<_> = registry.drivers().iter().map(|d| d.name().to_string()).collect();
        assert_eq!(names, vec!["D", "B", "C", "A"]);

        registry.vfs().write_mem_file("/vsimem/abx", b"ABX".to_vec()).unwrap();
        registry.vfs().write_mem_file("/vsimem/abc", b"ABC".to_vec()).unwrap();
        registry.vfs().write_mem_file("/vsimem/zzz", b"ZZZ".to_vec()).unwrap();

        assert_eq!(registry.identify("/vsimem/abx").unwrap().name(), "B");
        assert_eq!(registry.identify("/vsimem/abc").unwrap().name(), "D");
        assert_eq!(registry.identify("/vsimem/zzz").unwrap().name(), "A");
    }

    #[test]
    fn test_identify_is_deterministic() {
        let registry = DriverRegistry::builder()
            .register(driver("X", b"XY", DetectionPriority::Normal))
            .register(driver("Y", b"X", DetectionPriority::Normal))
            .build();
        registry.vfs().write_mem_file("/vsimem/xy", b"XYZ".to_vec()).unwrap();

        for _ in 0..10 {
            assert_eq!(registry.identify("/vsimem/xy").unwrap().name(), "X");
        }
    }

    #[test]
    fn test_no_matching_driver() {
        let registry = DriverRegistry::builder()
            .register(driver("X", b"XY", DetectionPriority::Normal))
            .build();
        registry.vfs().write_mem_file("/vsimem/q", b"QQ".to_vec()).unwrap();

        assert!(registry.identify("/vsimem/q").is_none());
        let err = registry.open("/vsimem/q", AccessMode::ReadOnly).err().unwrap();
        assert!(matches!(err, Error::FormatNotRecognized(_)));
    }

    #[test]
    fn test_missing_file_reports_io_error() {
        let registry = DriverRegistry::builder()
            .register(driver("X", b"XY", DetectionPriority::Normal))
            .build();
        let err = registry.open("/vsimem/missing", AccessMode::ReadOnly).err().unwrap();
        assert!(matches!(err, Error::IoAt { .. }));
    }

    #[test]
    fn test_malformed_geometry_rejected() {
        let registry = DriverRegistry::builder()
            .register(MagicDriver {
                name: "Z",
                magic: b"Z",
                priority: DetectionPriority::Normal,
                width: 0,
            })
            .build();
        registry.vfs().write_mem_file("/vsimem/z", b"Z".to_vec()).unwrap();

        let err = registry.open("/vsimem/z", AccessMode::ReadOnly).err().unwrap();
        assert!(matches!(err, Error::MalformedSource { .. }));
        assert!(registry.open_datasets().is_empty());
    }

    #[test]
    fn test_open_bookkeeping_and_shared_open() {
        let registry = DriverRegistry::builder()
            .register(driver("X", b"X", DetectionPriority::Normal))
            .build();
        registry.vfs().write_mem_file("/vsimem/x", b"X".to_vec()).unwrap();

        let a = registry.open_shared("/vsimem/x", AccessMode::ReadOnly).unwrap();
        let b = registry.open_shared("/vsimem/x", AccessMode::ReadOnly).unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(registry.open_datasets().len(), 1);

        let c = registry.open("/vsimem/x", AccessMode::ReadOnly).unwrap();
        assert_ne!(a.id(), c.id());
        assert_eq!(registry.open_datasets().len(), 2);

        let id = c.id();
        c.close().unwrap();
        assert!(!registry.is_open(id));

        drop(a);
        drop(b);
        assert!(registry.open_datasets().is_empty());
    }

    #[test]
    fn test_unknown_driver() {
        let registry = DriverRegistry::builder().build();
        let spec = CreateSpec::new(1, 1, 1, DataType::U8);
        assert!(matches!(
            registry.create("/vsimem/n", "nope", &spec),
            Err(Error::UnknownDriver(_))
        ));
        assert!(matches!(
            registry.open_with_driver("/vsimem/n", "nope", AccessMode::ReadOnly),
            Err(Error::UnknownDriver(_))
        ));
    }

    #[test]
    fn test_create_requires_capable_driver() {
        let registry = DriverRegistry::builder()
            .register(driver("X", b"X", DetectionPriority::Normal))
            .build();
        let spec = CreateSpec::new(1, 1, 1, DataType::U8);
        assert!(matches!(
            registry.create("/vsimem/n", "x", &spec),
            Err(Error::Unsupported(_))
        ));
    }
}
