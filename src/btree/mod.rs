//! # Block B-Tree Engine
//!
//! This module implements the ordered key/value engine at the heart of the
//! store: a B-tree of fixed-size blocks living inside a pluggable block
//! allocator, with copy-on-write semantics for read-only blocks.
//!
//! ## Architecture Overview
//!
//! Keys are variable-length byte strings bounded by `max_key_size`; values
//! are exactly `entry_size` bytes. Every tree node occupies one allocator
//! block and holds up to `fan_out` key/value slots plus `fan_out + 1` child
//! indices. Keys live in every block, leaf or not — this is a classic
//! B-tree, not a B+tree; an in-order walk of blocks yields the keys in
//! byte-lexicographic order.
//!
//! ```text
//!                   [block 7: "g"]
//!                  /              \
//!     [block 3: "b","d"]     [block 9: "m","r"]
//!     /      |       \        /      |      \
//!   [..a]  [c]      [e,f]  [h..l]  [n..q]  [s..]
//! ```
//!
//! ## Block Layout
//!
//! ```text
//! Offset                 Content
//! ------                 -------
//! 0                      size   : u32    populated slots
//! 4                      height : u32    0 for leaves
//! 8                      child[0..=fan_out] : u64 each (0 = none)
//! 8 + 8*(fan_out+1)      slot[0..fan_out]: keylen u32, key, value
//! ```
//!
//! ## Copy-on-Write
//!
//! Blocks marked read-only by the allocator are never written. Mutations
//! route every block write through a copy-up step: writable blocks are
//! rewritten in place, read-only blocks are shadow-copied to a fresh
//! allocation and the parent pointer is updated. A tree whose blocks are
//! all read-only is a snapshot: it stays observably identical while clones
//! of it diverge block by block.
//!
//! Tree roots are plain block indices, and the engine never changes a
//! tree's root index — root splits and root contraction rewrite the root
//! block in place. Creating, forking and destroying trees is cheap:
//! [`BTree::create_empty`], [`BTree::clone_root`], [`BTree::free_tree`].
//!
//! ## Balance Discipline
//!
//! Every non-root block keeps at least `fan_out/2` keys. Inserts split full
//! blocks around the median on the way down; deletes rebalance or merge
//! underfull children on the way back up; all leaves stay at equal depth.
//!
//! ## Module Organization
//!
//! - `codec`: block layout encoding ([`NodeLayout`], [`BlockView`],
//!   [`BlockMut`]); pure, no I/O
//! - `search`: in-block binary search ([`search_block`])
//! - `tree`: the [`BTree`] handle and read-side operations
//! - `insert`: insertion and split propagation
//! - `delete`: removal, rebalancing and root contraction
//!
//! ## Concurrency
//!
//! A mutable root is single-writer: concurrent mutations of one root are
//! not supported. Distinct roots backed by one allocator may be used
//! concurrently if the allocator's own synchronization permits; the engine
//! adds no locking of its own.

mod codec;
mod delete;
mod insert;
mod search;
mod tree;

pub use codec::{BlockMut, BlockView, NodeLayout, BLOCK_HEADER_SIZE};
pub use search::search_block;
pub use tree::{BTree, TreeConfig, TreeStats};

/// Tree root / block index handle. Index 0 means "no block": the empty
/// tree at the root position, "no child" below it.
pub type TreeIndex = crate::block::BlockIndex;
