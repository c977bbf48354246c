//! # In-Memory Block Allocator
//!
//! A heap-backed [`BlockAllocator`] with the full contract: index recycling
//! through a free list, read-only marking, and a shared buffer pool. The
//! production block file lives outside this crate; this allocator stands in
//! for it in tests, benchmarks, fuzzing and documentation examples.
//!
//! Freed indices are recycled in LIFO order, which is deliberately hostile
//! to stale-pointer bugs: a dangling child index will usually resurface as
//! an unrelated block rather than a missing one.
//!
//! `freeze` / `freeze_all` mark blocks read-only, which is how tests build
//! snapshot scenarios: freeze the reachable set, then watch mutations
//! shadow-copy instead of writing in place.

use eyre::{bail, ensure, Result};
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;

use super::{BlockAllocator, BlockIndex};
use crate::memory::BufferPool;

/// Buffers pre-allocated per fresh pool; descent depth rarely exceeds this.
const POOL_PREALLOC: usize = 8;

/// Heap-backed block allocator with read-only marking.
pub struct MemoryAllocator {
    state: Mutex<AllocState>,
    pool: BufferPool,
    block_size: usize,
}

struct AllocState {
    blocks: HashMap<BlockIndex, Box<[u8]>>,
    read_only: HashSet<BlockIndex>,
    free: Vec<BlockIndex>,
    next_index: BlockIndex,
}

impl MemoryAllocator {
    /// Create an allocator of `block_size`-byte blocks. Index 0 is reserved
    /// and never allocated.
    pub fn new(block_size: usize) -> Self {
        Self {
            state: Mutex::new(AllocState {
                blocks: HashMap::new(),
                read_only: HashSet::new(),
                free: Vec::new(),
                next_index: 1,
            }),
            pool: BufferPool::new(block_size, POOL_PREALLOC),
            block_size,
        }
    }

    /// Mark a single live block read-only. Subsequent writes to it fail and
    /// the engine's mutation paths shadow-copy it instead.
    pub fn freeze(&self, index: BlockIndex) -> Result<()> {
        let mut state = self.state.lock();
        ensure!(
            state.blocks.contains_key(&index),
            "freeze of unallocated block {index}"
        );
        state.read_only.insert(index);
        Ok(())
    }

    /// Mark every currently-allocated block read-only, turning all live
    /// trees into snapshots.
    pub fn freeze_all(&self) {
        let mut state = self.state.lock();
        let live: Vec<BlockIndex> = state.blocks.keys().copied().collect();
        state.read_only.extend(live);
    }

    /// Number of currently-allocated blocks. Leak checks compare this
    /// against the expected reachable set.
    pub fn live_blocks(&self) -> usize {
        self.state.lock().blocks.len()
    }

    /// Number of live blocks currently marked read-only.
    pub fn frozen_blocks(&self) -> usize {
        self.state.lock().read_only.len()
    }
}

impl BlockAllocator for MemoryAllocator {
    type Tag = ();

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn allocate(&self, _tag: ()) -> Result<BlockIndex> {
        let mut state = self.state.lock();
        let index = state.free.pop().unwrap_or_else(|| {
            let index = state.next_index;
            state.next_index += 1;
            index
        });
        let block = vec![0u8; self.block_size].into_boxed_slice();
        state.blocks.insert(index, block);
        Ok(index)
    }

    fn free(&self, index: BlockIndex) -> Result<()> {
        let mut state = self.state.lock();
        ensure!(
            !state.read_only.contains(&index),
            "free of read-only block {index}"
        );
        ensure!(
            state.blocks.remove(&index).is_some(),
            "free of unallocated block {index}"
        );
        state.free.push(index);
        Ok(())
    }

    fn read(&self, index: BlockIndex, buf: &mut [u8]) -> Result<()> {
        let state = self.state.lock();
        let Some(block) = state.blocks.get(&index) else {
            bail!("read of unallocated block {index}");
        };
        ensure!(
            buf.len() >= self.block_size,
            "read buffer too small: {} < {}",
            buf.len(),
            self.block_size
        );
        buf[..self.block_size].copy_from_slice(block);
        Ok(())
    }

    fn write(&self, _tag: (), index: BlockIndex, buf: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        ensure!(
            !state.read_only.contains(&index),
            "write to read-only block {index}"
        );
        let Some(block) = state.blocks.get_mut(&index) else {
            bail!("write to unallocated block {index}");
        };
        ensure!(
            buf.len() >= self.block_size,
            "write buffer too small: {} < {}",
            buf.len(),
            self.block_size
        );
        block.copy_from_slice(&buf[..self.block_size]);
        Ok(())
    }

    fn is_block_read_only(&self, index: BlockIndex) -> bool {
        self.state.lock().read_only.contains(&index)
    }

    fn pool(&self) -> &BufferPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_never_returns_zero() {
        let alloc = MemoryAllocator::new(64);
        for _ in 0..10 {
            let index = alloc.allocate(()).unwrap();
            assert_ne!(index, 0);
        }
    }

    #[test]
    fn allocate_zero_fills_blocks() {
        let alloc = MemoryAllocator::new(64);
        let index = alloc.allocate(()).unwrap();

        alloc.write((), index, &[0xFF; 64]).unwrap();
        alloc.free(index).unwrap();

        // Recycled index must come back zeroed.
        let again = alloc.allocate(()).unwrap();
        assert_eq!(again, index);
        let mut buf = [0xAA; 64];
        alloc.read(again, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 64]);
    }

    #[test]
    fn write_read_roundtrip() {
        let alloc = MemoryAllocator::new(32);
        let index = alloc.allocate(()).unwrap();

        let data = [7u8; 32];
        alloc.write((), index, &data).unwrap();

        let mut buf = [0u8; 32];
        alloc.read(index, &mut buf).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn read_after_free_fails() {
        let alloc = MemoryAllocator::new(32);
        let index = alloc.allocate(()).unwrap();
        alloc.free(index).unwrap();

        let mut buf = [0u8; 32];
        assert!(alloc.read(index, &mut buf).is_err());
        assert_eq!(alloc.live_blocks(), 0);
    }

    #[test]
    fn frozen_blocks_reject_writes_and_frees() {
        let alloc = MemoryAllocator::new(32);
        let index = alloc.allocate(()).unwrap();
        alloc.freeze(index).unwrap();

        assert!(alloc.is_block_read_only(index));
        assert!(alloc.write((), index, &[0u8; 32]).is_err());
        assert!(alloc.free(index).is_err());

        let mut buf = [0u8; 32];
        alloc.read(index, &mut buf).unwrap();
    }

    #[test]
    fn freeze_all_covers_live_blocks_only() {
        let alloc = MemoryAllocator::new(32);
        let a = alloc.allocate(()).unwrap();
        let _b = alloc.allocate(()).unwrap();
        alloc.freeze_all();
        assert_eq!(alloc.frozen_blocks(), 2);
        assert!(alloc.is_block_read_only(a));

        // Fresh allocations stay writable.
        let c = alloc.allocate(()).unwrap();
        assert!(!alloc.is_block_read_only(c));
        alloc.write((), c, &[1u8; 32]).unwrap();
    }

    #[test]
    fn pool_buffers_match_block_size() {
        let alloc = MemoryAllocator::new(96);
        let buf = alloc.pool().acquire();
        assert_eq!(buf.len(), 96);
    }
}
