//! # blocktree — On-Disk B-Tree Engine with Copy-on-Write Snapshots
//!
//! `blocktree` is the ordered-index engine of a content-addressed
//! filesystem store: a B-tree of fixed-size blocks mapping bounded
//! variable-length byte keys to fixed-length values, persisted through a
//! pluggable block allocator. Blocks can be marked read-only, turning whole
//! trees into immutable snapshots that mutations shadow-copy instead of
//! touching.
//!
//! ## Quick Start
//!
//! ```
//! use blocktree::{BTree, MemoryAllocator, TreeConfig};
//!
//! # fn main() -> eyre::Result<()> {
//! let alloc = MemoryAllocator::new(4096);
//! let tree = BTree::open(&alloc, TreeConfig {
//!     max_key_size: 32,
//!     entry_size: 8,
//!     fan_out: 0, // auto-size to the block
//! })?;
//!
//! let root = tree.create_empty(())?;
//! tree.insert((), root, b"hello", &42u64.to_le_bytes(), false)?;
//!
//! let (value, rank) = tree.find(root, b"hello")?.unwrap();
//! assert_eq!(value, 42u64.to_le_bytes());
//! assert_eq!(rank, 0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Tree Operations (find/scan/insert/…)   │
//! ├──────────────────┬──────────────────────┤
//! │   Block Codec    │   Search Primitive   │
//! ├──────────────────┴──────────────────────┤
//! │   Block Allocator Contract (trait)       │
//! ├─────────────────────────────────────────┤
//! │   Backing Store (block file, memory, …)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The engine owns everything above the allocator contract; the block file
//! and its cache live outside this crate. [`MemoryAllocator`] is a complete
//! in-memory implementation of the contract for tests and tools.
//!
//! ## Operation Surface
//!
//! - [`BTree::find`] — point lookup, returning the value and in-order rank
//! - [`BTree::by_index`] — positional lookup by rank
//! - [`BTree::scan`] — ordered traversal from an optional start key
//! - [`BTree::insert`] / [`BTree::delete`] — balanced mutation
//! - [`BTree::create_empty`] / [`BTree::clone_root`] / [`BTree::free_tree`]
//!   — tree lifecycle
//! - [`BTree::count`] / [`BTree::check`] — audit and statistics
//!
//! ## Copy-on-Write Contract
//!
//! Mutating a tree requires a mutable root block; mutating below it never
//! writes a read-only block. Instead, the mutated copy goes to a fresh
//! allocation and the parent's child pointer is updated, cascading at most
//! once per level per operation. Snapshots therefore share unchanged
//! subtrees with their descendants indefinitely; see `free_tree`'s
//! `ignore_read_only` for the snapshot-safe bulk free.
//!
//! ## Module Overview
//!
//! - [`btree`]: page codec, search primitive and tree operations
//! - [`block`]: the allocator contract and the in-memory allocator
//! - [`memory`]: pooled block buffers
//! - [`error`]: distinguished error kinds

pub mod block;
pub mod btree;
pub mod error;
pub mod memory;

pub use block::{BlockAllocator, BlockIndex, MemoryAllocator};
pub use btree::{BTree, TreeConfig, TreeIndex, TreeStats};
pub use error::TreeError;
pub use memory::{BufferPool, PooledBuffer};
