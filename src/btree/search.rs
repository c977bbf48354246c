//! # Block Search Primitive
//!
//! Binary search for a key within one decoded block. Comparison is plain
//! byte-lexicographic slice ordering; keys inside a block are strictly
//! ascending, so the search is O(log fan_out) with no duplicate handling.

use std::cmp::Ordering;

use super::codec::BlockView;

/// Locate `key` among the populated slots of `block`.
///
/// Returns `(index, matched)` where `index` is the smallest slot index whose
/// key is `>= key` (or `size` when every key is smaller), and `matched` is
/// true when the slot key equals `key` exactly. The index doubles as the
/// child to descend into on a miss and the insertion point for new keys.
pub fn search_block(block: &BlockView<'_>, key: &[u8]) -> (usize, bool) {
    let mut lo = 0;
    let mut hi = block.size();

    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match block.key(mid).cmp(key) {
            Ordering::Less => lo = mid + 1,
            Ordering::Equal => return (mid, true),
            Ordering::Greater => hi = mid,
        }
    }
    (lo, false)
}
