//! Copy-on-write snapshot behavior, end to end.
//!
//! A frozen tree must stay observably identical across any amount of
//! mutation through cloned roots, mutable clones must share untouched
//! subtrees with the snapshot they came from, and the snapshot-safe bulk
//! free must release exactly the mutable blocks.

use std::collections::BTreeMap;

use blocktree::{BTree, MemoryAllocator, TreeConfig, TreeError};

fn tree(alloc: &MemoryAllocator) -> BTree<'_, MemoryAllocator> {
    BTree::open(
        alloc,
        TreeConfig {
            max_key_size: 8,
            entry_size: 4,
            fan_out: 4,
        },
    )
    .unwrap()
}

fn populate(
    tree: &BTree<'_, MemoryAllocator>,
    root: u64,
    n: u32,
) -> BTreeMap<Vec<u8>, Vec<u8>> {
    let mut reference = BTreeMap::new();
    for i in 0..n {
        let key = format!("key{i:04}").into_bytes();
        let value = format!("{i:04}").into_bytes();
        tree.insert((), root, &key, &value, false).unwrap();
        reference.insert(key, value);
    }
    reference
}

fn contents(tree: &BTree<'_, MemoryAllocator>, root: u64) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    assert!(tree
        .scan(root, None, &mut |_, k, v| {
            out.push((k.to_vec(), v.to_vec()));
            true
        })
        .unwrap());
    out
}

#[test]
fn frozen_root_rejects_mutations_but_serves_reads() {
    let alloc = MemoryAllocator::new(1000);
    let tree = tree(&alloc);
    let root = tree.create_empty(()).unwrap();
    populate(&tree, root, 20);
    alloc.freeze_all();

    let err = tree
        .insert((), root, b"newkey", b"0000", false)
        .unwrap_err();
    assert!(TreeError::RootImmutable.matches(&err));

    let err = tree.delete((), root, b"key0003").unwrap_err();
    assert!(TreeError::RootImmutable.matches(&err));

    let (value, _) = tree.find(root, b"key0003").unwrap().unwrap();
    assert_eq!(value, b"0003");
    assert_eq!(tree.count(root).unwrap(), 20);
}

#[test]
fn snapshot_is_isolated_from_clone_mutations() {
    let alloc = MemoryAllocator::new(1000);
    let tree = tree(&alloc);
    let root = tree.create_empty(()).unwrap();
    let reference = populate(&tree, root, 60);
    let frozen_view = contents(&tree, root);
    alloc.freeze_all();

    // Fork a mutable head off the snapshot and churn it hard.
    let head = tree.clone_root((), root).unwrap();
    let mut head_reference = reference.clone();
    for i in 0..60u32 {
        let key = format!("key{i:04}").into_bytes();
        if i % 2 == 0 {
            tree.delete((), head, &key).unwrap();
            head_reference.remove(&key);
        } else {
            let value = format!("n{i:03}").into_bytes();
            tree.insert((), head, &key, &value, true).unwrap();
            head_reference.insert(key, value);
        }
    }
    for i in 100..140u32 {
        let key = format!("key{i:04}").into_bytes();
        let value = format!("{i:04}").into_bytes();
        tree.insert((), head, &key, &value, false).unwrap();
        head_reference.insert(key, value);
    }

    // The head sees its own state...
    let head_expect: Vec<(Vec<u8>, Vec<u8>)> = head_reference
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    assert_eq!(contents(&tree, head), head_expect);
    tree.check(head).unwrap();

    // ...while the snapshot still reads exactly as frozen.
    assert_eq!(contents(&tree, root), frozen_view);
    let (value, rank) = tree.find(root, b"key0000").unwrap().unwrap();
    assert_eq!(value, b"0000");
    assert_eq!(rank, 0);
    tree.check(root).unwrap();
}

#[test]
fn clone_mutation_shadow_copies_only_the_touched_path() {
    let alloc = MemoryAllocator::new(1000);
    let tree = tree(&alloc);
    let root = tree.create_empty(()).unwrap();
    populate(&tree, root, 60);
    let snapshot_blocks = tree.check(root).unwrap().blocks;
    alloc.freeze_all();

    let head = tree.clone_root((), root).unwrap();
    let before = alloc.live_blocks();

    // One overwrite dirties one root-to-leaf path, nothing more.
    tree.insert((), head, b"key0031", b"xxxx", true).unwrap();
    let path_len = tree.check(head).unwrap().height as usize + 1;
    let copied = alloc.live_blocks() - before;
    assert!(
        copied < path_len,
        "one update shadow-copied {copied} blocks on a height-{} tree",
        path_len - 1
    );

    // The head still shares the bulk of the snapshot's blocks.
    assert!(tree.check(head).unwrap().blocks == snapshot_blocks);
    assert!((alloc.live_blocks() as u64) < 2 * snapshot_blocks);
}

#[test]
fn free_tree_on_head_leaves_snapshot_intact() {
    let alloc = MemoryAllocator::new(1000);
    let tree = tree(&alloc);
    let root = tree.create_empty(()).unwrap();
    let reference = populate(&tree, root, 60);
    alloc.freeze_all();
    let frozen = alloc.live_blocks();

    let head = tree.clone_root((), root).unwrap();
    for i in 200..260u32 {
        let key = format!("key{i:04}").into_bytes();
        tree.insert((), head, &key, b"0000", false).unwrap();
    }
    assert!(alloc.live_blocks() > frozen);

    // Snapshot-safe bulk free: drops every mutable block of the head,
    // skips the shared read-only subtrees.
    tree.free_tree(head, true).unwrap();
    assert_eq!(alloc.live_blocks(), frozen);

    // The snapshot is untouched.
    let expect: Vec<(Vec<u8>, Vec<u8>)> =
        reference.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    assert_eq!(contents(&tree, root), expect);
    tree.check(root).unwrap();
}

#[test]
fn chained_snapshots_share_through_generations() {
    let alloc = MemoryAllocator::new(1000);
    let tree = tree(&alloc);
    let gen0 = tree.create_empty(()).unwrap();
    populate(&tree, gen0, 40);
    alloc.freeze_all();

    // Generation 1: fork, mutate, freeze again.
    let gen1 = tree.clone_root((), gen0).unwrap();
    tree.insert((), gen1, b"key9000", b"g1g1", false).unwrap();
    tree.delete((), gen1, b"key0000").unwrap();
    alloc.freeze_all();

    // Generation 2 mutates on top of both.
    let gen2 = tree.clone_root((), gen1).unwrap();
    tree.insert((), gen2, b"key9001", b"g2g2", false).unwrap();

    assert_eq!(tree.count(gen0).unwrap(), 40);
    assert_eq!(tree.count(gen1).unwrap(), 40);
    assert_eq!(tree.count(gen2).unwrap(), 41);

    assert!(tree.find(gen0, b"key9000").unwrap().is_none());
    assert!(tree.find(gen1, b"key9000").unwrap().is_some());
    assert!(tree.find(gen1, b"key9001").unwrap().is_none());
    assert!(tree.find(gen2, b"key9001").unwrap().is_some());
    assert!(tree.find(gen0, b"key0000").unwrap().is_some());
    assert!(tree.find(gen1, b"key0000").unwrap().is_none());

    for root in [gen0, gen1, gen2] {
        tree.check(root).unwrap();
    }
}

#[test]
fn free_tree_without_ignore_fails_on_shared_subtrees() {
    let alloc = MemoryAllocator::new(1000);
    let tree = tree(&alloc);
    let root = tree.create_empty(()).unwrap();
    populate(&tree, root, 40);
    alloc.freeze_all();

    let head = tree.clone_root((), root).unwrap();
    // The head's root is mutable but its children are frozen: a strict
    // free is a caller error.
    assert!(tree.free_tree(head, false).is_err());
}
