//! Process-wide block cache with a byte budget and write-back
//!
//! Blocks live in an arena of slots addressed through a key index. Recency is an
//! ordered map from access tick to slot, so the least recently used block is the
//! first entry. A single mutex guards the bookkeeping; block buffers have their
//! own locks so pixel copies and driver I/O happen outside the cache lock.
//!
//! Dirty victims are pinned, written back with the cache lock released, and only
//! then removed. A failed write-back keeps the block resident and dirty, and
//! eviction leaves that dataset's dirty blocks alone until its next flush.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::CacheConfig;
use crate::error::{Error, Result};

use super::block::{Block, BlockBuffer, BlockKey, DatasetId};

/// Persistence target for dirty blocks of one dataset
pub trait BlockStore: Send + Sync {
    /// Writes one block through the owning driver
    fn write_back(&self, key: &BlockKey, data: &[u8]) -> Result<()>;

    /// Called when an eviction write-back fails, since no caller is waiting for it
    fn record_failure(&self, error: &Error);
}

/// How a block that is not yet resident gets its content
pub enum Populate<'a> {
    /// Fill through the given loader (normally a driver read)
    Load(&'a (dyn Fn(&mut [u8]) -> Result<()> + 'a)),
    /// The caller overwrites the whole block; start from zeroes
    Overwrite,
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub write_backs: u64,
    pub used_bytes: usize,
    pub max_bytes: usize,
    pub blocks: usize,
}

impl CacheStats {
    /// Fraction of lookups served from resident blocks
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Slot {
    key: BlockKey,
    block: Arc<Block>,
    size: usize,
    refs: usize,
    tick: u64,
    evicting: bool,
}

#[derive(Default)]
struct CacheState {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    index: HashMap<BlockKey, usize>,
    recency: BTreeMap<u64, usize>,
    clock: u64,
    used_bytes: usize,
    stores: HashMap<DatasetId, Weak<dyn BlockStore>>,
    /// Datasets with a failed eviction write-back
    stalled: HashSet<DatasetId>,
}

impl CacheState {
    fn slot(&self, idx: usize) -> Option<&Slot> {
        self.slots.get(idx).and_then(|s| s.as_ref())
    }

    fn slot_mut(&mut self, idx: usize) -> Option<&mut Slot> {
        self.slots.get_mut(idx).and_then(|s| s.as_mut())
    }

    fn touch(&mut self, idx: usize) {
        self.clock += 1;
        let tick = self.clock;
        if let Some(slot) = self.slots.get_mut(idx).and_then(|s| s.as_mut()) {
            self.recency.remove(&slot.tick);
            slot.tick = tick;
            self.recency.insert(tick, idx);
        }
    }

    fn insert(&mut self, key: BlockKey, block: Arc<Block>, size: usize) -> usize {
        self.clock += 1;
        let slot = Slot {
            key,
            block,
            size,
            refs: 1,
            tick: self.clock,
            evicting: false,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.recency.insert(self.clock, idx);
        self.used_bytes += size;
        idx
    }

    fn remove(&mut self, idx: usize) -> Option<Slot> {
        let slot = self.slots.get_mut(idx)?.take()?;
        self.index.remove(&slot.key);
        self.recency.remove(&slot.tick);
        self.used_bytes -= slot.size;
        self.free.push(idx);
        Some(slot)
    }
}

/// A dirty block pinned for write-back outside the cache lock
struct Victim {
    key: BlockKey,
    block: Arc<Block>,
    store: Option<Arc<dyn BlockStore>>,
}

/// Shared LRU cache of raster blocks
pub struct BlockCache {
    state: Mutex<CacheState>,
    max_bytes: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    write_backs: AtomicU64,
}

impl BlockCache {
    /// Creates an empty cache with the budget from `config`
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_max_bytes(config.max_bytes)
    }

    /// Creates an empty cache holding at most `max_bytes` of block buffers
    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_bytes: AtomicUsize::new(max_bytes),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            write_backs: AtomicU64::new(0),
        }
    }

    /// Current budget in bytes
    pub fn max_bytes(&self) -> usize {
        self.max_bytes.load(Ordering::Relaxed)
    }

    /// Changes the budget, evicting immediately if the cache is now over it
    pub fn set_max_bytes(&self, max_bytes: usize) {
        self.max_bytes.store(max_bytes, Ordering::Relaxed);
        debug!(max_bytes, "block cache budget changed");
        self.enforce_budget();
    }

    /// Registers the write-back target of a dataset
    pub fn register_store(&self, dataset: DatasetId, store: Weak<dyn BlockStore>) {
        self.state.lock().stores.insert(dataset, store);
    }

    /// Runs `f` on the block at `key`, bringing it into the cache first if needed.
    ///
    /// The block stays referenced, and therefore unevictable, until `f` returns.
    /// Concurrent callers on the same key are serialised on the block.
    pub fn with_block<R>(
        &self,
        key: BlockKey,
        size: usize,
        populate: Populate<'_>,
        f: impl FnOnce(&mut BlockBuffer<'_>) -> R,
    ) -> Result<R> {
        let block = self.checkout(key, size);
        let _checkout = Checkout { cache: self, key };

        let mut state = block.state.lock();
        if !state.loaded {
            match populate {
                Populate::Load(load) => load(&mut state.data)?,
                Populate::Overwrite => state.data.fill(0),
            }
            state.loaded = true;
        }

        let mut buffer = BlockBuffer::new(&mut state);
        Ok(f(&mut buffer))
    }

    fn checkout(&self, key: BlockKey, size: usize) -> Arc<Block> {
        let (block, victims) = {
            let mut state = self.state.lock();
            let resident = match state.index.get(&key).copied() {
                Some(idx) => {
                    state.touch(idx);
                    state.slot_mut(idx).map(|slot| {
                        slot.refs += 1;
                        Arc::clone(&slot.block)
                    })
                }
                None => None,
            };

            if let Some(block) = resident {
                self.hits.fetch_add(1, Ordering::Relaxed);
                (block, Vec::new())
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(%key, size, "block cache miss");
                let block = Arc::new(Block::new(size));
                state.insert(key, Arc::clone(&block), size);
                let victims = self.select_victims(&mut state);
                (block, victims)
            }
        };

        self.write_back_victims(victims);
        block
    }

    fn release(&self, key: BlockKey) {
        let victims = {
            let mut state = self.state.lock();
            if let Some(&idx) = state.index.get(&key) {
                if let Some(slot) = state.slot_mut(idx) {
                    slot.refs = slot.refs.saturating_sub(1);
                }
            }
            if state.used_bytes > self.max_bytes() {
                self.select_victims(&mut state)
            } else {
                Vec::new()
            }
        };
        self.write_back_victims(victims);
    }

    /// Walks the recency order from the oldest block, removing clean unreferenced
    /// blocks and pinning dirty ones until the budget is met
    fn select_victims(&self, state: &mut CacheState) -> Vec<Victim> {
        let budget = self.max_bytes();
        if state.used_bytes <= budget {
            return Vec::new();
        }

        let candidates: Vec<usize> = state.recency.values().copied().collect();
        let mut pending = 0usize;
        let mut victims = Vec::new();

        for idx in candidates {
            if state.used_bytes - pending <= budget {
                break;
            }
            let Some(slot) = state.slot(idx) else { continue };
            if slot.refs > 0 || slot.evicting {
                continue;
            }

            let dirty = match slot.block.state.try_lock() {
                Some(block_state) => block_state.dirty,
                None => continue,
            };
            if dirty && state.stalled.contains(&slot.key.dataset) {
                continue;
            }

            if !dirty {
                if let Some(slot) = state.remove(idx) {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    trace!(key = %slot.key, "evicted clean block");
                }
                continue;
            }

            let store = state
                .stores
                .get(&slot.key.dataset)
                .and_then(|weak| weak.upgrade());
            if let Some(slot) = state.slot_mut(idx) {
                slot.refs += 1;
                slot.evicting = true;
                pending += slot.size;
                victims.push(Victim {
                    key: slot.key,
                    block: Arc::clone(&slot.block),
                    store,
                });
            }
        }

        victims
    }

    fn write_back_victims(&self, victims: Vec<Victim>) {
        for victim in victims {
            let outcome = {
                let mut block_state = victim.block.state.lock();
                if !block_state.dirty {
                    Ok(())
                } else {
                    let written = match &victim.store {
                        Some(store) => store.write_back(&victim.key, &block_state.data),
                        None => Err(Error::WriteBack {
                            dataset: victim.key.dataset.to_string(),
                            message: "dataset closed with dirty blocks".to_string(),
                        }),
                    };
                    if written.is_ok() {
                        block_state.dirty = false;
                        self.write_backs.fetch_add(1, Ordering::Relaxed);
                    }
                    written
                }
            };

            let mut state = self.state.lock();
            let Some(&idx) = state.index.get(&victim.key) else { continue };
            let remove = match state.slot_mut(idx) {
                Some(slot) => {
                    slot.evicting = false;
                    slot.refs = slot.refs.saturating_sub(1);
                    slot.refs == 0
                }
                None => false,
            };

            match outcome {
                Ok(()) => {
                    if remove && state.remove(idx).is_some() {
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                        trace!(key = %victim.key, "evicted block after write-back");
                    }
                }
                Err(error) if victim.store.is_none() => {
                    // Owner is gone; nothing can ever persist this block
                    warn!(key = %victim.key, %error, "dropping orphaned dirty block");
                    if remove && state.remove(idx).is_some() {
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(error) => {
                    state.stalled.insert(victim.key.dataset);
                    drop(state);
                    warn!(key = %victim.key, %error, "write-back during eviction failed");
                    if let Some(store) = &victim.store {
                        store.record_failure(&error);
                    }
                }
            }
        }
    }

    fn enforce_budget(&self) {
        let victims = {
            let mut state = self.state.lock();
            self.select_victims(&mut state)
        };
        self.write_back_victims(victims);
    }

    /// Writes back every dirty block of `dataset` in row-major order.
    ///
    /// Continues past failures and returns the first error. Blocks that failed
    /// stay dirty.
    pub fn flush_dataset(&self, dataset: DatasetId, store: &dyn BlockStore) -> Result<()> {
        let pinned: Vec<(BlockKey, Arc<Block>)> = {
            let mut state = self.state.lock();
            let mut keys: Vec<(BlockKey, usize)> = state
                .index
                .iter()
                .filter(|(key, _)| key.dataset == dataset)
                .map(|(key, idx)| (*key, *idx))
                .collect();
            keys.sort();

            let mut pinned = Vec::with_capacity(keys.len());
            for (key, idx) in keys {
                if let Some(slot) = state.slot_mut(idx) {
                    slot.refs += 1;
                    pinned.push((key, Arc::clone(&slot.block)));
                }
            }
            pinned
        };

        let mut first_error = None;
        let mut written = 0usize;
        for (key, block) in pinned {
            {
                let mut block_state = block.state.lock();
                if block_state.dirty && block_state.loaded {
                    match store.write_back(&key, &block_state.data) {
                        Ok(()) => {
                            block_state.dirty = false;
                            written += 1;
                            self.write_backs.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(error) => {
                            warn!(%key, %error, "write-back during flush failed");
                            first_error.get_or_insert(error);
                        }
                    }
                }
            }
            self.release(key);
        }

        debug!(%dataset, written, "flushed dataset blocks");
        match first_error {
            Some(error) => Err(error),
            None => {
                self.state.lock().stalled.remove(&dataset);
                Ok(())
            }
        }
    }

    /// Drops every unreferenced block of `dataset` without writing it back and
    /// forgets its store. Returns the number of blocks removed.
    pub fn discard_dataset(&self, dataset: DatasetId) -> usize {
        let mut state = self.state.lock();
        let targets: Vec<usize> = state
            .index
            .iter()
            .filter(|(key, _)| key.dataset == dataset)
            .map(|(_, idx)| *idx)
            .collect();

        let mut removed = 0;
        for idx in targets {
            let Some(slot) = state.slot(idx) else { continue };
            if slot.refs > 0 {
                continue;
            }
            if slot.block.state.try_lock().is_some_and(|s| s.dirty) {
                warn!(key = %slot.key, "discarding dirty block");
            }
            if state.remove(idx).is_some() {
                removed += 1;
            }
        }
        state.stores.remove(&dataset);
        state.stalled.remove(&dataset);
        debug!(%dataset, removed, "discarded dataset blocks");
        removed
    }

    /// Whether the block at `key` is resident
    pub fn contains(&self, key: &BlockKey) -> bool {
        self.state.lock().index.contains_key(key)
    }

    /// Dirty flag of a resident block, `None` when not resident
    pub fn is_dirty(&self, key: &BlockKey) -> Option<bool> {
        let block = {
            let state = self.state.lock();
            let idx = *state.index.get(key)?;
            Arc::clone(&state.slot(idx)?.block)
        };
        let dirty = block.state.lock().dirty;
        Some(dirty)
    }

    /// Number of resident blocks belonging to `dataset`
    pub fn dataset_blocks(&self, dataset: DatasetId) -> usize {
        self.state
            .lock()
            .index
            .keys()
            .filter(|key| key.dataset == dataset)
            .count()
    }

    /// Bytes held by resident block buffers
    pub fn used_bytes(&self) -> usize {
        self.state.lock().used_bytes
    }

    /// Number of resident blocks
    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counters and occupancy at this moment
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            write_backs: self.write_backs.load(Ordering::Relaxed),
            used_bytes: state.used_bytes,
            max_bytes: self.max_bytes(),
            blocks: state.index.len(),
        }
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

/// Drops the reference taken by `checkout`
struct Checkout<'a> {
    cache: &'a BlockCache,
    key: BlockKey,
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        self.cache.release(self.key);
    }
}
