//! Drivers shipped with the crate

pub mod flat;
pub(crate) mod header;
pub mod mem;
pub mod tiled;
pub mod r#virtual;

pub use flat::FlatGridDriver;
pub use mem::MemDriver;
pub use r#virtual::{VirtualBand, VirtualDocument, VirtualDriver, VirtualSourceRef};
pub use tiled::TiledGridDriver;

use crate::driver::DriverRegistryBuilder;

/// Adds every built-in driver to `builder`
pub fn register_builtin(builder: DriverRegistryBuilder) -> DriverRegistryBuilder {
    builder
        .register(FlatGridDriver::default())
        .register(TiledGridDriver::default())
        .register(VirtualDriver)
        .register(MemDriver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverRegistry;

    #[test]
    fn test_builtin_names() {
        let registry = DriverRegistry::with_builtin_drivers(Default::default());
        let names: Vec<&str> = registry.drivers().iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["FlatGrid", "TiledGrid", "Virtual", "MEM"]);
        assert!(registry.driver_by_name("mem").is_some());
    }
}
