//! # Block Allocator Contract
//!
//! The tree engine stores nodes in fixed-size blocks addressed by 64-bit
//! indices and owned by a pluggable allocator. This module defines that
//! seam: the [`BlockAllocator`] trait every backing store implements, and an
//! in-memory implementation used by tests, benchmarks and examples.
//!
//! ## Contract
//!
//! | Operation | Behavior |
//! |---|---|
//! | `block_size()` | Fixed block size in bytes; constant for the allocator's lifetime |
//! | `allocate(tag)` | Fresh writable block index; never 0 |
//! | `free(index)` | Release an index; later reads of it are undefined |
//! | `read(index, buf)` | Fill `buf` with the block's current contents |
//! | `write(tag, index, buf)` | Replace the block's contents |
//! | `is_block_read_only(index)` | True when writes must be redirected via copy-on-write |
//! | `pool()` | Lease/return reusable block-sized buffers |
//!
//! Index 0 is reserved by convention: no allocator hands it out, and the
//! engine uses it for "no child" and "empty tree".
//!
//! The `tag` is an opaque value the allocator may use to group allocations
//! (for accounting or placement); the engine propagates whatever tag the
//! caller supplied to the initial operation and never inspects it.
//!
//! ## Concurrency
//!
//! Methods take `&self`; implementations carry their own interior
//! synchronization. This is what allows distinct tree roots backed by one
//! allocator to be operated on concurrently — the engine itself adds no
//! locking, and a single mutable root remains single-writer.
//!
//! ## Read-only blocks
//!
//! An allocator may mark blocks read-only (a committed snapshot, a shared
//! deduplicated subtree). The engine never writes to such a block: every
//! mutation path routes through a copy-up step that allocates a fresh block
//! instead, and the parent pointer is updated to the new index.

mod memory;

pub use memory::MemoryAllocator;

use eyre::Result;

use crate::memory::BufferPool;

/// Block index handle. Index 0 is reserved and never refers to a live block.
pub type BlockIndex = u64;

/// Backing store for fixed-size blocks.
///
/// All I/O the tree engine performs goes through this trait; it is the only
/// suspension point in any tree operation.
pub trait BlockAllocator {
    /// Opaque allocation-grouping value propagated from callers.
    type Tag: Copy;

    /// Fixed size in bytes of every block.
    fn block_size(&self) -> usize;

    /// Allocate a fresh writable block and return its index.
    fn allocate(&self, tag: Self::Tag) -> Result<BlockIndex>;

    /// Release a block. Reading the index afterwards is undefined.
    fn free(&self, index: BlockIndex) -> Result<()>;

    /// Fill `buf` (at least `block_size` bytes) with the block's contents.
    fn read(&self, index: BlockIndex, buf: &mut [u8]) -> Result<()>;

    /// Replace the block's contents with the first `block_size` bytes of `buf`.
    fn write(&self, tag: Self::Tag, index: BlockIndex, buf: &[u8]) -> Result<()>;

    /// True when the block must not be written and mutations require
    /// copy-on-write into a fresh allocation.
    fn is_block_read_only(&self, index: BlockIndex) -> bool;

    /// The allocator's buffer pool for block-sized scratch buffers.
    fn pool(&self) -> &BufferPool;
}
