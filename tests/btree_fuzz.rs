//! Differential fuzz of the tree engine against `BTreeMap`.
//!
//! Mirrors the store's production workload shape: a mixed stream of finds,
//! inserts (with fallback-to-replace on conflict) and deletes over a small
//! key domain, auditing the full tree against the reference map at a fixed
//! cadence. Runs a deliberately tiny geometry (fan_out = 4) so splits,
//! rotations, merges and root transitions all fire constantly.

use std::collections::BTreeMap;

use blocktree::{BTree, MemoryAllocator, TreeConfig, TreeError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const OPS: usize = 50_000;
const KEY_DOMAIN: u32 = 1_000;
const VALUE_DOMAIN: u32 = 10_000;

fn small_tree(alloc: &MemoryAllocator) -> BTree<'_, MemoryAllocator> {
    BTree::open(
        alloc,
        TreeConfig {
            max_key_size: 4,
            entry_size: 4,
            fan_out: 4,
        },
    )
    .unwrap()
}

#[test]
fn mixed_ops_match_reference_map() {
    let alloc = MemoryAllocator::new(1000);
    let tree = small_tree(&alloc);
    let root = tree.create_empty(()).unwrap();

    let mut rng = StdRng::seed_from_u64(555);
    let mut reference: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

    for step in 0..OPS {
        let key = format!("{}", rng.gen_range(0..KEY_DOMAIN)).into_bytes();

        match rng.gen_range(0..3) {
            0 => {
                // Find, plus rank round-trip through by_index on every hit.
                let expected = reference.get(&key);
                let got = tree.find(root, &key).unwrap();
                match (expected, got) {
                    (None, None) => {}
                    (Some(want), Some((value, rank))) => {
                        assert_eq!(&value, want, "step {step}: wrong value");
                        let (bk, bv) = tree.by_index(root, rank).unwrap();
                        assert_eq!(bk, key, "step {step}: by_index key mismatch");
                        assert_eq!(&bv, want, "step {step}: by_index value mismatch");
                    }
                    (want, got) => {
                        panic!("step {step}: presence mismatch, map={want:?} tree={got:?}")
                    }
                }
            }
            1 => {
                // Insert; on conflict retry with replace, like the import path.
                let value = format!("{:04}", rng.gen_range(0..VALUE_DOMAIN)).into_bytes();
                let existed = reference.insert(key.clone(), value.clone()).is_some();
                match tree.insert((), root, &key, &value, false) {
                    Ok(()) => assert!(!existed, "step {step}: insert succeeded over a key"),
                    Err(err) => {
                        assert!(
                            existed && TreeError::KeyAlreadyExists.matches(&err),
                            "step {step}: unexpected insert error: {err}"
                        );
                        tree.insert((), root, &key, &value, true).unwrap();
                    }
                }
            }
            _ => {
                let existed = reference.remove(&key).is_some();
                match tree.delete((), root, &key) {
                    Ok(()) => assert!(existed, "step {step}: delete of absent key succeeded"),
                    Err(err) => assert!(
                        !existed && TreeError::KeyNotFound.matches(&err),
                        "step {step}: unexpected delete error: {err}"
                    ),
                }
            }
        }

        if step % 100 == 0 {
            audit_scan(&tree, root, &reference, step);
        }
        if step % 2_500 == 0 {
            audit_structure(&tree, root, &reference, step);
        }
    }

    audit_scan(&tree, root, &reference, OPS);
    audit_structure(&tree, root, &reference, OPS);
}

/// Full ordered scan must replay the reference map exactly, ranks included.
fn audit_scan(
    tree: &BTree<'_, MemoryAllocator>,
    root: u64,
    reference: &BTreeMap<Vec<u8>, Vec<u8>>,
    step: usize,
) {
    let mut expected = reference.iter();
    let mut visited = 0u64;
    let done = tree
        .scan(root, None, &mut |rank, key, value| {
            let (want_key, want_value) = expected
                .next()
                .unwrap_or_else(|| panic!("step {step}: scan yielded an extra entry"));
            assert_eq!(key, want_key.as_slice(), "step {step}: scan key order");
            assert_eq!(value, want_value.as_slice(), "step {step}: scan value");
            assert_eq!(rank, visited, "step {step}: scan rank");
            visited += 1;
            true
        })
        .unwrap();
    assert!(done, "step {step}: full scan did not complete");
    assert_eq!(visited as usize, reference.len(), "step {step}: scan count");
}

/// Structural invariants plus the height bound for the current population.
fn audit_structure(
    tree: &BTree<'_, MemoryAllocator>,
    root: u64,
    reference: &BTreeMap<Vec<u8>, Vec<u8>>,
    step: usize,
) {
    let stats = tree.check(root).unwrap();
    assert_eq!(stats.keys as usize, reference.len(), "step {step}");

    // With minimum occupancy fan_out/2 = 2, height is bounded by
    // log2 of the key count (plus the root, which may run small).
    if stats.keys > 1 {
        let bound = 64 - (stats.keys + 1).leading_zeros();
        assert!(
            stats.height <= bound,
            "step {step}: height {} exceeds bound {bound} for {} keys",
            stats.height,
            stats.keys
        );
    }
}

#[test]
fn restartable_scans_cover_every_key() {
    let alloc = MemoryAllocator::new(1000);
    let tree = small_tree(&alloc);
    let root = tree.create_empty(()).unwrap();

    let mut rng = StdRng::seed_from_u64(7_777);
    let mut reference: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    for _ in 0..600 {
        let key = format!("{}", rng.gen_range(0..KEY_DOMAIN)).into_bytes();
        let value = format!("{:04}", rng.gen_range(0..VALUE_DOMAIN)).into_bytes();
        reference.insert(key.clone(), value.clone());
        tree.insert((), root, &key, &value, true).unwrap();
    }

    // Resume a scan from the last-seen key after every visited entry, the
    // way a paused iterator picks back up mid-tree.
    let mut count = 0usize;
    let mut resume_at: Option<Vec<u8>> = None;
    loop {
        let mut first = true;
        let mut next_start: Option<Vec<u8>> = None;
        let done = tree
            .scan(root, resume_at.as_deref(), &mut |rank, key, value| {
                if !first {
                    next_start = Some(key.to_vec());
                    return false;
                }
                first = false;

                let want = reference.get(key).expect("scan yielded unknown key");
                assert_eq!(value, want.as_slice());
                assert_eq!(rank as usize, count, "mid-tree scan rank");
                count += 1;
                true
            })
            .unwrap();
        if done {
            break;
        }
        resume_at = next_start;
    }
    assert_eq!(count, reference.len());
}

#[test]
fn by_index_enumerates_scan_order() {
    let alloc = MemoryAllocator::new(1000);
    let tree = small_tree(&alloc);
    let root = tree.create_empty(()).unwrap();

    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..300 {
        let key = format!("{}", rng.gen_range(0..KEY_DOMAIN)).into_bytes();
        let value = format!("{:04}", rng.gen_range(0..VALUE_DOMAIN)).into_bytes();
        tree.insert((), root, &key, &value, true).unwrap();
    }

    let mut scanned = Vec::new();
    assert!(tree
        .scan(root, None, &mut |_, k, v| {
            scanned.push((k.to_vec(), v.to_vec()));
            true
        })
        .unwrap());

    let total = tree.count(root).unwrap();
    assert_eq!(total as usize, scanned.len());
    for (rank, (key, value)) in scanned.iter().enumerate() {
        let (bk, bv) = tree.by_index(root, rank as u64).unwrap();
        assert_eq!(&bk, key);
        assert_eq!(&bv, value);
    }

    let err = tree.by_index(root, total).unwrap_err();
    assert!(TreeError::OutOfRange.matches(&err));
}
