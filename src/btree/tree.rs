//! # Tree Operations
//!
//! The [`BTree`] handle ties a [`NodeLayout`] to a block allocator and
//! implements the operation surface: `create_empty`, `find`, `by_index`,
//! `scan`, `count`, `insert` (in `insert.rs`), `delete` (in `delete.rs`),
//! `free_tree`, `clone_root` and `check`.
//!
//! ## Roots are parameters
//!
//! A `BTree` holds no root: every operation takes a tree root index. One
//! allocator commonly backs many trees (one per directory, one per
//! snapshot), and read-only snapshot roots coexist with the mutable head.
//!
//! ## Copy-on-write
//!
//! Every block rewritten by a mutating operation passes through the
//! copy-up helper: a mutable block is written in place, a read-only
//! block is shadow-copied into a fresh allocation and the new index is
//! stored into the parent. The root block itself must be mutable (enforced
//! up front), so a tree's root index is stable across mutations.
//!
//! ## Subtree counts
//!
//! The block layout stores no subtree key counts, so rank computation
//! (`find`'s returned rank, `by_index`, mid-tree `scan` starts) recounts
//! subtrees by traversal. Counts are memoized in an in-memory side table
//! keyed by block index. The memo stays correct because every structural
//! change rewrites the whole root-to-leaf path it touched: each rewritten
//! or freed index is invalidated, and an untouched index can only describe
//! an untouched subtree. Read-only blocks never change, so their entries
//! are valid forever.
//!
//! ## Buffers
//!
//! Descent leases one block buffer per level from the allocator's pool and
//! returns it on every exit path, error or not; `PooledBuffer`'s drop
//! guarantees release.

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::codec::{BlockMut, BlockView, NodeLayout};
use super::search::search_block;
use super::TreeIndex;
use crate::block::BlockAllocator;
use crate::error::TreeError;

/// Tree shape parameters supplied at open time.
///
/// `fan_out` must be even; 0 selects the largest even fan-out that fits the
/// allocator's block size.
#[derive(Debug, Clone, Copy)]
pub struct TreeConfig {
    /// Upper bound, in bytes, on any stored key (>= 1).
    pub max_key_size: usize,
    /// Exact value size in bytes.
    pub entry_size: usize,
    /// Maximum keys per block; a block has up to `fan_out + 1` children.
    pub fan_out: usize,
}

/// Aggregate results of a structural [`BTree::check`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStats {
    /// Total resident keys.
    pub keys: u64,
    /// Height of the root block (0 for a leaf-only tree).
    pub height: u32,
    /// Reachable blocks, including the root.
    pub blocks: u64,
}

/// B-tree engine over a block allocator.
///
/// Cheap to construct; holds only the resolved layout, the allocator
/// reference and the count memo. Clone-free sharing across trees is the
/// normal mode: one `BTree` serves every root with the same configuration.
pub struct BTree<'a, A: BlockAllocator> {
    blocks: &'a A,
    layout: NodeLayout,
    counts: Mutex<HashMap<TreeIndex, u64>>,
}

impl<'a, A: BlockAllocator> std::fmt::Debug for BTree<'a, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTree").field("layout", &self.layout).finish()
    }
}

impl<'a, A: BlockAllocator> BTree<'a, A> {
    /// Open a tree engine against `blocks`.
    ///
    /// Fails with [`TreeError::Configuration`] when the fan-out is odd or
    /// the allocator's blocks cannot hold a single tree block.
    pub fn open(blocks: &'a A, config: TreeConfig) -> Result<Self> {
        let layout = NodeLayout::resolve(
            config.max_key_size,
            config.entry_size,
            config.fan_out,
            blocks.block_size(),
        )?;
        debug!(
            fan_out = layout.fan_out(),
            block_size = layout.block_size(),
            max_key_size = layout.max_key_size(),
            entry_size = layout.entry_size(),
            "btree.open"
        );
        Ok(Self {
            blocks,
            layout,
            counts: Mutex::new(HashMap::new()),
        })
    }

    /// The resolved block geometry.
    pub fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    /// Allocate a genuinely empty tree: one zeroed block (size 0, height 0,
    /// no children). Returns its index, the new tree's root.
    pub fn create_empty(&self, tag: A::Tag) -> Result<TreeIndex> {
        let index = self.blocks.allocate(tag)?;
        let mut buf = self.blocks.pool().acquire();
        buf.fill(0);
        self.write_block(tag, index, &buf)?;
        trace!(root = index, "btree.create_empty");
        Ok(index)
    }

    /// Copy the root block of `root` verbatim into a fresh writable block.
    ///
    /// This is the first step of mutating a snapshot: the clone is a mutable
    /// root sharing every descendant with the original; descendants are
    /// shadow-copied on demand as mutations reach them.
    pub fn clone_root(&self, tag: A::Tag, root: TreeIndex) -> Result<TreeIndex> {
        ensure!(root != 0, "cannot clone the null tree root");
        let mut buf = self.blocks.pool().acquire();
        self.blocks.read(root, &mut buf)?;
        let index = self.blocks.allocate(tag)?;
        self.write_block(tag, index, &buf)?;
        trace!(root, clone = index, "btree.clone_root");
        Ok(index)
    }

    /// Point lookup.
    ///
    /// On a hit returns a copy of the value and the key's zero-based
    /// in-order rank (the count of keys strictly less than it across the
    /// whole tree). Root index 0 is the empty tree and always misses.
    pub fn find(&self, root: TreeIndex, key: &[u8]) -> Result<Option<(Vec<u8>, u64)>> {
        let mut index = root;
        let mut rank: u64 = 0;
        let mut buf = self.blocks.pool().acquire();

        while index != 0 {
            self.blocks.read(index, &mut buf)?;
            let v = BlockView::new(self.layout, &buf);
            let (i, matched) = search_block(&v, key);

            rank += i as u64;
            for j in 0..i {
                rank += self.count(v.child(j))?;
            }
            if matched {
                rank += self.count(v.child(i))?;
                return Ok(Some((v.value(i).to_vec(), rank)));
            }
            index = v.child(i);
        }
        Ok(None)
    }

    /// Positional lookup: the `rank`-th key in ascending order, zero-based.
    ///
    /// Fails with [`TreeError::OutOfRange`] unless `rank < count(root)`.
    /// Inverse of the rank returned by [`BTree::find`].
    pub fn by_index(&self, root: TreeIndex, rank: u64) -> Result<(Vec<u8>, Vec<u8>)> {
        let total = self.count(root)?;
        ensure!(rank < total, TreeError::OutOfRange);

        let mut index = root;
        let mut remaining = rank;
        let mut buf = self.blocks.pool().acquire();

        'descend: loop {
            self.blocks.read(index, &mut buf)?;
            let v = BlockView::new(self.layout, &buf);
            let size = v.size();

            for i in 0..=size {
                let sub = self.count(v.child(i))?;
                if remaining < sub {
                    index = v.child(i);
                    continue 'descend;
                }
                remaining -= sub;
                if i < size {
                    if remaining == 0 {
                        return Ok((v.key(i).to_vec(), v.value(i).to_vec()));
                    }
                    remaining -= 1;
                }
            }
            bail!("tree key counts are inconsistent at block {index}");
        }
    }

    /// Total number of resident keys under `root`.
    pub fn count(&self, root: TreeIndex) -> Result<u64> {
        if root == 0 {
            return Ok(0);
        }
        let cached = self.counts.lock().get(&root).copied();
        if let Some(n) = cached {
            return Ok(n);
        }

        let mut buf = self.blocks.pool().acquire();
        self.blocks.read(root, &mut buf)?;
        let v = BlockView::new(self.layout, &buf);
        let size = v.size();
        let mut n = size as u64;
        if !v.is_leaf() {
            for i in 0..=size {
                n += self.count(v.child(i))?;
            }
        }
        self.counts.lock().insert(root, n);
        Ok(n)
    }

    /// In-order traversal from the first key `>= start_key` (from the
    /// leftmost key when `start_key` is `None`).
    ///
    /// The visitor receives `(rank, key, value)` per entry, with key and
    /// value borrowed from traversal-owned buffers — copy them to retain
    /// them. Returning `false` aborts the traversal. The result is `true`
    /// iff every remaining entry was visited.
    pub fn scan<F>(&self, root: TreeIndex, start_key: Option<&[u8]>, visitor: &mut F) -> Result<bool>
    where
        F: FnMut(u64, &[u8], &[u8]) -> bool,
    {
        let mut rank: u64 = 0;
        self.scan_block(root, start_key, &mut rank, visitor)
    }

    fn scan_block<F>(
        &self,
        index: TreeIndex,
        start_key: Option<&[u8]>,
        rank: &mut u64,
        visitor: &mut F,
    ) -> Result<bool>
    where
        F: FnMut(u64, &[u8], &[u8]) -> bool,
    {
        if index == 0 {
            return Ok(true);
        }
        let mut buf = self.blocks.pool().acquire();
        self.blocks.read(index, &mut buf)?;
        let v = BlockView::new(self.layout, &buf);
        let size = v.size();

        let mut start = 0;
        let mut first_child_handled = false;
        if let Some(sk) = start_key {
            let (i, matched) = search_block(&v, sk);
            for j in 0..i {
                *rank += self.count(v.child(j))?;
            }
            *rank += i as u64;
            start = i;
            first_child_handled = true;
            if matched {
                // The matched key is the first to visit; everything under
                // child[i] precedes it.
                *rank += self.count(v.child(i))?;
            } else if !self.scan_block(v.child(i), start_key, rank, visitor)? {
                return Ok(false);
            }
        }

        for i in start..size {
            if !first_child_handled && !self.scan_block(v.child(i), None, rank, visitor)? {
                return Ok(false);
            }
            first_child_handled = false;

            let r = *rank;
            *rank += 1;
            if !visitor(r, v.key(i), v.value(i)) {
                return Ok(false);
            }
        }

        // Rightmost child, unless the start-key descent already covered it.
        if first_child_handled && start == size {
            return Ok(true);
        }
        self.scan_block(v.child(size), None, rank, visitor)
    }

    /// Free every block reachable from `index`, post-order, including the
    /// root block itself. Index 0 is a no-op.
    ///
    /// With `ignore_read_only` set, read-only subtrees are silently left in
    /// place (the snapshot-safe bulk free); without it, encountering a
    /// read-only block is an error — the caller mis-scoped the free.
    pub fn free_tree(&self, index: TreeIndex, ignore_read_only: bool) -> Result<()> {
        if index == 0 {
            return Ok(());
        }
        if self.blocks.is_block_read_only(index) {
            if ignore_read_only {
                return Ok(());
            }
            bail!("attempt to free read-only block {index}");
        }

        let mut buf = self.blocks.pool().acquire();
        self.blocks.read(index, &mut buf)?;
        let v = BlockView::new(self.layout, &buf);
        let size = v.size();
        for i in 0..=size {
            let child = v.child(i);
            if child != 0 {
                self.free_tree(child, ignore_read_only)?;
            }
        }
        drop(buf);
        trace!(block = index, "btree.free");
        self.free_block(index)
    }

    /// Verify the structural invariants of the tree rooted at `root`:
    /// strict in-block key order, subtree key separation, height
    /// consistency, child presence in internal blocks, zeroed children in
    /// leaves, and minimum occupancy of non-root blocks. Returns aggregate
    /// statistics on success.
    pub fn check(&self, root: TreeIndex) -> Result<TreeStats> {
        if root == 0 {
            return Ok(TreeStats::default());
        }
        let mut stats = TreeStats::default();
        self.check_block(root, true, None, None, &mut stats)?;
        let mut buf = self.blocks.pool().acquire();
        self.blocks.read(root, &mut buf)?;
        stats.height = BlockView::new(self.layout, &buf).height();
        Ok(stats)
    }

    fn check_block(
        &self,
        index: TreeIndex,
        is_root: bool,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        stats: &mut TreeStats,
    ) -> Result<()> {
        let mut buf = self.blocks.pool().acquire();
        self.blocks.read(index, &mut buf)?;
        let v = BlockView::new(self.layout, &buf);
        let size = v.size();
        let height = v.height();
        let fan_out = self.layout.fan_out();

        ensure!(size <= fan_out, "block {index}: size {size} exceeds fan out");
        if !is_root {
            ensure!(
                size * 2 >= fan_out,
                "block {index}: underfull, size {size} < {}",
                fan_out / 2
            );
        }
        if is_root && size == 0 {
            ensure!(height == 0, "block {index}: empty root must be a leaf");
            ensure!(v.child(0) == 0, "block {index}: empty root with a child");
        }

        for i in 0..size {
            let key = v.key(i);
            ensure!(
                !key.is_empty() && key.len() <= self.layout.max_key_size(),
                "block {index}: slot {i} key length out of range"
            );
            if i > 0 {
                ensure!(
                    v.key(i - 1) < key,
                    "block {index}: keys out of order at slot {i}"
                );
            }
        }
        if size > 0 {
            if let Some(lo) = lower {
                ensure!(lo < v.key(0), "block {index}: key below subtree bound");
            }
            if let Some(hi) = upper {
                ensure!(
                    v.key(size - 1) < hi,
                    "block {index}: key above subtree bound"
                );
            }
        }

        if height == 0 {
            for i in 0..=fan_out {
                ensure!(
                    v.child(i) == 0,
                    "block {index}: leaf has child pointer at {i}"
                );
            }
        } else {
            for i in 0..=size {
                let child = v.child(i);
                ensure!(child != 0, "block {index}: missing child at {i}");
                let child_lower = if i == 0 { lower } else { Some(v.key(i - 1)) };
                let child_upper = if i == size { upper } else { Some(v.key(i)) };
                self.check_block(child, false, child_lower, child_upper, stats)?;

                let mut child_buf = self.blocks.pool().acquire();
                self.blocks.read(child, &mut child_buf)?;
                let child_height = BlockView::new(self.layout, &child_buf).height();
                ensure!(
                    child_height + 1 == height,
                    "block {index}: child {child} height {child_height} under height {height}"
                );
            }
        }

        stats.keys += size as u64;
        stats.blocks += 1;
        Ok(())
    }

    // -- shared internals ----------------------------------------------

    /// Write `block` to `index`, or to a fresh allocation when `index` is
    /// read-only. Returns the index actually written; the caller must store
    /// a changed index into the parent slot.
    pub(crate) fn copy_up(&self, tag: A::Tag, index: TreeIndex, block: &[u8]) -> Result<TreeIndex> {
        ensure!(
            BlockView::new(self.layout, block).size() > 0,
            "cannot save block with size 0"
        );
        let target = if self.blocks.is_block_read_only(index) {
            let fresh = self.blocks.allocate(tag)?;
            trace!(from = index, to = fresh, "btree.shadow_copy");
            fresh
        } else {
            index
        };
        self.write_block(tag, target, block)?;
        Ok(target)
    }

    /// All engine writes funnel through here so the count memo stays honest.
    pub(crate) fn write_block(&self, tag: A::Tag, index: TreeIndex, block: &[u8]) -> Result<()> {
        self.counts.lock().remove(&index);
        self.blocks.write(tag, index, block)
    }

    /// All engine frees funnel through here so the count memo stays honest.
    pub(crate) fn free_block(&self, index: TreeIndex) -> Result<()> {
        self.counts.lock().remove(&index);
        self.blocks.free(index)
    }

    pub(crate) fn allocator(&self) -> &'a A {
        self.blocks
    }

    pub(crate) fn validate_key(&self, key: &[u8]) -> Result<()> {
        ensure!(!key.is_empty(), TreeError::InvalidKey("empty key"));
        ensure!(
            key.len() <= self.layout.max_key_size(),
            TreeError::InvalidKey("key length too long")
        );
        Ok(())
    }

    pub(crate) fn validate_value(&self, value: &[u8]) -> Result<()> {
        ensure!(
            value.len() == self.layout.entry_size(),
            TreeError::InvalidValue
        );
        Ok(())
    }

    /// Make a `BlockMut` over a pooled buffer.
    pub(crate) fn block_mut<'b>(&self, buf: &'b mut [u8]) -> BlockMut<'b> {
        BlockMut::new(self.layout, buf)
    }

    /// Make a `BlockView` over a pooled buffer.
    pub(crate) fn block_view<'b>(&self, buf: &'b [u8]) -> BlockView<'b> {
        BlockView::new(self.layout, buf)
    }
}
