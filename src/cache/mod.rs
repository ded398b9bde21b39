//! Block caching
//!
//! A single [`BlockCache`] is shared by every dataset opened through a registry.
//! Datasets address blocks by [`BlockKey`] and persist dirty blocks through the
//! [`BlockStore`] they register.

pub mod block;
pub mod block_cache;

pub use block::{BlockBuffer, BlockKey, DatasetId};
pub use block_cache::{BlockCache, BlockStore, CacheStats, Populate};
