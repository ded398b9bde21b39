//! Block identity and per-block state

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

static NEXT_DATASET_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an open dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetId(pub u64);

impl DatasetId {
    /// Allocates a fresh id
    pub fn next() -> Self {
        DatasetId(NEXT_DATASET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ds#{}", self.0)
    }
}

/// Cache address of one block. Field order makes the derived ordering
/// row-major within a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockKey {
    pub dataset: DatasetId,
    /// 1-based band index
    pub band: usize,
    pub y: usize,
    pub x: usize,
}

impl BlockKey {
    pub fn new(dataset: DatasetId, band: usize, x: usize, y: usize) -> Self {
        Self { dataset, band, y, x }
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/band {}/block ({}, {})", self.dataset, self.band, self.x, self.y)
    }
}

pub(crate) struct BlockState {
    pub(crate) data: Vec<u8>,
    pub(crate) dirty: bool,
    pub(crate) loaded: bool,
}

/// One cached tile. The mutex serialises every access to the buffer, including
/// driver reads and write-backs of this block.
pub(crate) struct Block {
    pub(crate) state: Mutex<BlockState>,
}

impl Block {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            state: Mutex::new(BlockState {
                data: vec![0u8; size],
                dirty: false,
                loaded: false,
            }),
        }
    }
}

/// A checked-out block buffer. Mutable access marks the block dirty.
pub struct BlockBuffer<'a> {
    state: &'a mut BlockState,
}

impl<'a> BlockBuffer<'a> {
    pub(crate) fn new(state: &'a mut BlockState) -> Self {
        Self { state }
    }

    pub fn data(&self) -> &[u8] {
        &self.state.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.state.dirty = true;
        &mut self.state.data
    }

    pub fn is_dirty(&self) -> bool {
        self.state.dirty
    }

    pub fn len(&self) -> usize {
        self.state.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_ids_are_unique() {
        let a = DatasetId::next();
        let b = DatasetId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("ds#"));
    }

    #[test]
    fn test_block_key_row_major_order() {
        let ds = DatasetId(7);
        let mut keys = vec![
            BlockKey::new(ds, 1, 1, 1),
            BlockKey::new(ds, 1, 0, 1),
            BlockKey::new(ds, 1, 1, 0),
            BlockKey::new(ds, 1, 0, 0),
        ];
        keys.sort();
        let coords: Vec<_> = keys.iter().map(|k| (k.x, k.y)).collect();
        assert_eq!(coords, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);
    }

    #[test]
    fn test_mutable_access_marks_dirty() {
        let block = Block::new(4);
        let mut state = block.state.lock();
        let mut buffer = BlockBuffer::new(&mut state);
        assert!(!buffer.is_dirty());
        assert_eq!(buffer.data(), &[0, 0, 0, 0]);

        buffer.data_mut()[0] = 1;
        assert!(buffer.is_dirty());
        assert_eq!(buffer.len(), 4);
    }
}
