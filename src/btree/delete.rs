//! # Delete
//!
//! Key removal with bottom-up rebalancing.
//!
//! The helper recurses toward the key. A leaf-resident key is shifted out
//! directly; a key found in an internal block is replaced by its in-order
//! predecessor, obtained by recursing into the left subtree with the
//! delete-max sentinel (no key). On the way back up, every visited block
//! inspects the child it just recursed into and restores minimum occupancy
//! before handing its own buffer to its caller.
//!
//! ## Rebalance or merge
//!
//! An underfull child pairs with its left sibling (the right one only when
//! no left exists). With the separator from the parent between them, the
//! pair either redistributes — when the combined key count reaches
//! `fan_out`, guaranteeing both halves end at or above minimum occupancy —
//! or merges into the left block, removing the separator from the parent.
//! The parent itself may then be underfull; its own caller deals with that
//! on unwind.
//!
//! ## Root contraction
//!
//! A root emptied to size 0 with a remaining child absorbs that child's
//! block wholesale, preserving the root index; the child block is freed
//! unless it is a read-only snapshot member, in which case it is merely
//! unreferenced. A root at size 0 with no child is simply the empty tree.

use eyre::{bail, ensure, Result};
use smallvec::SmallVec;
use tracing::trace;

use super::search::search_block;
use super::TreeIndex;
use crate::block::BlockAllocator;
use crate::error::TreeError;
use crate::memory::PooledBuffer;

/// Key and value removed by a delete-max probe, bubbled up to the internal
/// block that requested the predecessor.
type Removed = Option<(Vec<u8>, Vec<u8>)>;

impl<'a, A: BlockAllocator> super::BTree<'a, A> {
    /// Remove `key` from the tree rooted at `root`.
    ///
    /// Fails with [`TreeError::KeyNotFound`] when absent and
    /// [`TreeError::RootImmutable`] when the root block is read-only. The
    /// root index is unchanged; root contraction rewrites the root block in
    /// place.
    pub fn delete(&self, tag: A::Tag, root: TreeIndex, key: &[u8]) -> Result<()> {
        ensure!(
            !self.allocator().is_block_read_only(root),
            TreeError::RootImmutable
        );
        self.validate_key(key)?;

        let (mut root_buf, _) = self.delete_helper(tag, root, Some(key))?;

        let (size, first_child) = {
            let v = self.block_view(&root_buf);
            (v.size(), v.child(0))
        };
        if size == 0 && first_child != 0 {
            // Root emptied out: absorb the single remaining child.
            self.allocator().read(first_child, &mut root_buf)?;
            self.write_block(tag, root, &root_buf)?;
            trace!(root, child = first_child, "btree.root_contract");
            if !self.allocator().is_block_read_only(first_child) {
                self.free_block(first_child)?;
            }
            return Ok(());
        }

        self.write_block(tag, root, &root_buf)
    }

    /// Recursive worker. `key` of `None` is the delete-max sentinel: remove
    /// the subtree's greatest entry and return it.
    ///
    /// Returns the mutated buffer for `index`; the caller copies it up and
    /// stores the resulting index. The caller also guarantees minimum
    /// occupancy for the returned block — this function only fixes up the
    /// children it recursed into.
    fn delete_helper(
        &self,
        tag: A::Tag,
        index: TreeIndex,
        key: Option<&[u8]>,
    ) -> Result<(PooledBuffer, Removed)> {
        ensure!(index != 0, TreeError::KeyNotFound);

        let fan_out = self.layout().fan_out();
        let mut buf = self.allocator().pool().acquire();
        self.allocator().read(index, &mut buf)?;
        let mut b = self.block_mut(&mut buf);
        let size = b.size();

        let (i, matched) = match key {
            Some(k) => search_block(&b.as_view(), k),
            None => {
                ensure!(size > 0, "delete-max probe hit an empty block {index}");
                if b.child(size) == 0 {
                    (size - 1, true)
                } else {
                    (size, false)
                }
            }
        };
        let child_index = b.child(i);

        if matched && child_index == 0 {
            // Leaf-resident: shift the following slots down over it. The
            // removed entry is only materialized for delete-max probes.
            let removed = if key.is_none() {
                Some((b.key(i).to_vec(), b.value(i).to_vec()))
            } else {
                None
            };
            b.move_nodes(i, i + 1, size - 1 - i);
            b.set_size(size - 1);
            return Ok((buf, removed));
        }

        let (child_buf, removed) = if matched {
            // Internal hit: replace the entry with its in-order predecessor
            // pulled from the left subtree.
            let (child_buf, pred) = self.delete_helper(tag, child_index, None)?;
            let Some((pk, pv)) = pred else {
                bail!("delete-max probe of block {child_index} returned no entry");
            };
            b.set_node(i, &pk, &pv);
            (child_buf, Some((pk, pv)))
        } else {
            self.delete_helper(tag, child_index, key)?
        };

        let child_size = self.block_view(&child_buf).size();
        if child_size * 2 >= fan_out {
            // Child occupancy is fine; just store its (possibly new) index.
            let new_child = self.copy_up(tag, child_index, &child_buf)?;
            b.set_child(i, new_child);
            return Ok((buf, removed));
        }

        // Child is too small; pair it with a sibling.
        let sib_i = if i > 0 { i - 1 } else { i + 1 };
        ensure!(
            sib_i <= size,
            "underfull child of block {index} has no sibling"
        );
        let sib_index = b.child(sib_i);
        let mut sib_buf = self.allocator().pool().acquire();
        self.allocator().read(sib_index, &mut sib_buf)?;

        // Normalize to slot order: `l` is the smaller-index side, `l_slot`
        // the parent slot holding the separator between the two.
        let (l_slot, l_index, mut l_buf, r_index, mut r_buf) = if sib_i < i {
            (sib_i, sib_index, sib_buf, child_index, child_buf)
        } else {
            (i, child_index, child_buf, sib_index, sib_buf)
        };
        let l_size = self.block_view(&l_buf).size();
        let r_size = self.block_view(&r_buf).size();

        if l_size + r_size >= fan_out {
            // Redistribute across the pair; both sides end >= fan_out/2.
            let leaf = self.block_view(&l_buf).is_leaf();
            let mut children: SmallVec<[TreeIndex; 16]> = SmallVec::new();
            let mut nodes: Vec<Vec<u8>> = Vec::with_capacity(l_size + r_size + 1);
            {
                let lv = self.block_view(&l_buf);
                let rv = self.block_view(&r_buf);
                for j in 0..=l_size {
                    children.push(lv.child(j));
                    if j < l_size {
                        nodes.push(lv.node(j).to_vec());
                    }
                }
                nodes.push(b.as_view().node(l_slot).to_vec());
                for j in 0..=r_size {
                    children.push(rv.child(j));
                    if j < r_size {
                        nodes.push(rv.node(j).to_vec());
                    }
                }
            }

            let total = nodes.len();
            let new_l = (total - 1) / 2;
            let new_r = total - 1 - new_l;

            {
                let mut lm = self.block_mut(&mut l_buf);
                lm.set_size(new_l);
                for j in 0..new_l {
                    lm.copy_node(j, &nodes[j]);
                }
                if !leaf {
                    for j in 0..=new_l {
                        lm.set_child(j, children[j]);
                    }
                }
            }
            {
                let mut rm = self.block_mut(&mut r_buf);
                rm.set_size(new_r);
                for j in 0..new_r {
                    rm.copy_node(j, &nodes[new_l + 1 + j]);
                }
                if !leaf {
                    for j in 0..=new_r {
                        rm.set_child(j, children[new_l + 1 + j]);
                    }
                }
            }

            let l_new = self.copy_up(tag, l_index, &l_buf)?;
            let r_new = self.copy_up(tag, r_index, &r_buf)?;
            b.copy_node(l_slot, &nodes[new_l]);
            b.set_child(l_slot, l_new);
            b.set_child(l_slot + 1, r_new);
            trace!(left = l_new, right = r_new, "btree.rotate");
            return Ok((buf, removed));
        }

        // Merge right into left, pulling the separator down.
        {
            let rv = self.block_view(&r_buf);
            let mut lm = self.block_mut(&mut l_buf);
            lm.copy_node(l_size, b.as_view().node(l_slot));
            for j in 0..=r_size {
                lm.set_child(l_size + 1 + j, rv.child(j));
                if j < r_size {
                    lm.copy_node(l_size + 1 + j, rv.node(j));
                }
            }
            lm.set_size(l_size + r_size + 1);
        }
        let l_new = self.copy_up(tag, l_index, &l_buf)?;
        b.set_child(l_slot, l_new);
        if !self.allocator().is_block_read_only(r_index) {
            self.free_block(r_index)?;
        }

        // Drop the separator from this block.
        b.move_nodes(l_slot, l_slot + 1, size - 1 - l_slot);
        b.move_children(l_slot + 1, l_slot + 2, size - (l_slot + 1));
        b.set_size(size - 1);
        trace!(left = l_new, merged = r_index, "btree.merge");

        Ok((buf, removed))
    }
}
