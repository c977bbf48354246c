//! # Insert
//!
//! Key insertion with bottom-up split propagation.
//!
//! The helper recurses to the leaf where the key belongs and returns the
//! mutated block buffer to its caller, which funnels it through copy-up and
//! stores the (possibly new) child index. A full block splits into two
//! siblings of `fan_out/2` keys each, promoting the median entry; the
//! promotion cascades until a block with room absorbs it.
//!
//! ## Root splits
//!
//! The root index must never change — callers hold it as the tree's
//! identity. When the promotion reaches the top, the left half is moved to
//! a freshly allocated block and the root block is rebuilt in place as a
//! one-key block of height + 1 over the two halves.
//!
//! ## Split ordering
//!
//! With the new entry notionally inserted, entry `fan_out/2` (zero-indexed)
//! is promoted; the left sibling keeps entries `[0, fan_out/2)` and the
//! right sibling the rest. Child pointers partition around the same point.

use eyre::{ensure, Result};
use smallvec::SmallVec;
use tracing::trace;

use super::codec::BlockMut;
use super::search::search_block;
use super::TreeIndex;
use crate::block::BlockAllocator;
use crate::error::TreeError;
use crate::memory::PooledBuffer;

/// A split's outcome handed to the parent: the promoted entry (already in
/// node encoding) and the new right sibling.
struct Promotion {
    node: Vec<u8>,
    right: TreeIndex,
}

impl<'a, A: BlockAllocator> super::BTree<'a, A> {
    /// Insert `key` -> `value` into the tree rooted at `root`.
    ///
    /// With `replace` unset, an existing key fails with
    /// [`TreeError::KeyAlreadyExists`]; with it set, the value is
    /// overwritten in place along the copy-on-write path. The root block
    /// must be mutable ([`TreeError::RootImmutable`] otherwise); its index
    /// is unchanged by any insert, including root splits.
    pub fn insert(
        &self,
        tag: A::Tag,
        root: TreeIndex,
        key: &[u8],
        value: &[u8],
        replace: bool,
    ) -> Result<()> {
        ensure!(root != 0, "cannot insert into the null tree root");
        ensure!(
            !self.allocator().is_block_read_only(root),
            TreeError::RootImmutable
        );
        self.validate_key(key)?;
        self.validate_value(value)?;

        let (mut root_buf, promoted) = self.insert_helper(tag, root, key, value, replace)?;

        if let Some(p) = promoted {
            // Root split: the left half moves out, the root block is
            // rebuilt in place so the root index survives.
            let left = self.allocator().allocate(tag)?;
            self.write_block(tag, left, &root_buf)?;

            let mut b = self.block_mut(&mut root_buf);
            let height = b.height() + 1;
            b.zero_children();
            b.set_height(height);
            b.set_size(1);
            b.copy_node(0, &p.node);
            b.set_child(0, left);
            b.set_child(1, p.right);
            trace!(root, left, right = p.right, height, "btree.root_split");
        }

        self.write_block(tag, root, &root_buf)
    }

    /// Recursive worker: reads `index`, applies the insert beneath it, and
    /// returns the mutated buffer for the caller to copy up. A `Promotion`
    /// means this block split and the parent must absorb the median.
    fn insert_helper(
        &self,
        tag: A::Tag,
        index: TreeIndex,
        key: &[u8],
        value: &[u8],
        replace: bool,
    ) -> Result<(PooledBuffer, Option<Promotion>)> {
        let fan_out = self.layout().fan_out();
        let mut buf = self.allocator().pool().acquire();
        self.allocator().read(index, &mut buf)?;

        let mut b = self.block_mut(&mut buf);
        let (i, matched) = search_block(&b.as_view(), key);

        if matched {
            ensure!(replace, TreeError::KeyAlreadyExists);
            b.set_value(i, value);
            return Ok((buf, None));
        }

        let size = b.size();
        if b.is_leaf() {
            if size < fan_out {
                b.move_nodes(i + 1, i, size - i);
                b.set_node(i, key, value);
                b.set_size(size + 1);
                return Ok((buf, None));
            }
            let node = encode_node(self.layout().node_size(), self.layout().max_key_size(), key, value);
            let promoted = self.split_full_block(tag, &mut b, i, &node, 0)?;
            return Ok((buf, Some(promoted)));
        }

        let child_index = b.child(i);
        let (child_buf, child_promoted) = self.insert_helper(tag, child_index, key, value, replace)?;
        let new_child = self.copy_up(tag, child_index, &child_buf)?;
        drop(child_buf);
        b.set_child(i, new_child);

        let Some(p) = child_promoted else {
            return Ok((buf, None));
        };

        if size < fan_out {
            b.move_nodes(i + 1, i, size - i);
            b.move_children(i + 2, i + 1, size - i);
            b.copy_node(i, &p.node);
            b.set_child(i + 1, p.right);
            b.set_size(size + 1);
            return Ok((buf, None));
        }

        let promoted = self.split_full_block(tag, &mut b, i, &p.node, p.right)?;
        Ok((buf, Some(promoted)))
    }

    /// Split a full block around a new entry at position `insert_at`.
    ///
    /// `b` is rewritten as the left sibling; the right sibling is allocated
    /// and written here. `new_right` is the child pointer accompanying the
    /// new entry (0 at leaf level).
    fn split_full_block(
        &self,
        tag: A::Tag,
        b: &mut BlockMut<'_>,
        insert_at: usize,
        new_node: &[u8],
        new_right: TreeIndex,
    ) -> Result<Promotion> {
        let fan_out = self.layout().fan_out();
        let half = fan_out / 2;
        let height = b.height();
        let leaf = height == 0;

        let mut nodes: Vec<Vec<u8>> = Vec::with_capacity(fan_out + 1);
        for j in 0..fan_out {
            nodes.push(b.as_view().node(j).to_vec());
        }
        nodes.insert(insert_at, new_node.to_vec());

        let mut children: SmallVec<[TreeIndex; 16]> =
            (0..=fan_out).map(|j| b.child(j)).collect();
        children.insert(insert_at + 1, new_right);

        // Right sibling: entries (half, fan_out], children to match.
        let right_size = fan_out - half;
        let mut right_buf = self.allocator().pool().acquire();
        {
            let mut r = self.block_mut(&mut right_buf);
            r.zero_children();
            r.set_height(height);
            r.set_size(right_size);
            for j in 0..right_size {
                r.copy_node(j, &nodes[half + 1 + j]);
            }
            if !leaf {
                for j in 0..=right_size {
                    r.set_child(j, children[half + 1 + j]);
                }
            }
        }
        let right_index = self.allocator().allocate(tag)?;
        self.write_block(tag, right_index, &right_buf)?;
        drop(right_buf);

        // Left sibling: rewrite in place with entries [0, half).
        b.set_size(half);
        for j in 0..half {
            b.copy_node(j, &nodes[j]);
        }
        if !leaf {
            for j in 0..=half {
                b.set_child(j, children[j]);
            }
        }

        trace!(right = right_index, height, "btree.split");
        Ok(Promotion {
            node: std::mem::take(&mut nodes[half]),
            right: right_index,
        })
    }
}

/// Encode a key/value pair in node form: keylen, key, padding, value.
fn encode_node(node_size: usize, max_key_size: usize, key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut node = vec![0u8; node_size];
    node[..4].copy_from_slice(&(key.len() as u32).to_le_bytes());
    node[4..4 + key.len()].copy_from_slice(key);
    node[4 + max_key_size..].copy_from_slice(value);
    node
}
