//! Fuzz testing for tree operations.
//!
//! Feeds arbitrary operation sequences to the engine while mirroring them
//! into a `BTreeMap`, then checks that scans agree and that structural
//! invariants hold. Runs on a tiny fan-out so rebalancing fires early.

#![no_main]

use std::collections::BTreeMap;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use blocktree::{BTree, MemoryAllocator, TreeConfig, TreeError};

#[derive(Debug, Arbitrary)]
struct TreeInput {
    operations: Vec<TreeOperation>,
}

#[derive(Debug, Arbitrary)]
enum TreeOperation {
    Insert { key: u16, value: u16, replace: bool },
    Delete { key: u16 },
    Find { key: u16 },
    Snapshot,
}

fuzz_target!(|input: TreeInput| {
    let alloc = MemoryAllocator::new(512);
    let tree = BTree::open(
        &alloc,
        TreeConfig {
            max_key_size: 6,
            entry_size: 6,
            fan_out: 4,
        },
    )
    .unwrap();
    let mut root = tree.create_empty(()).unwrap();
    let mut reference: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

    for op in input.operations.iter().take(512) {
        match op {
            TreeOperation::Insert { key, value, replace } => {
                let key = format!("{key:05}").into_bytes();
                let value = format!("{value:06}").into_bytes();
                let existed = reference.contains_key(&key);
                match tree.insert((), root, &key, &value, *replace) {
                    Ok(()) => {
                        assert!(*replace || !existed);
                        reference.insert(key, value);
                    }
                    Err(err) => {
                        assert!(!replace && existed);
                        assert!(TreeError::KeyAlreadyExists.matches(&err));
                    }
                }
            }
            TreeOperation::Delete { key } => {
                let key = format!("{key:05}").into_bytes();
                match tree.delete((), root, &key) {
                    Ok(()) => {
                        assert!(reference.remove(&key).is_some());
                    }
                    Err(err) => {
                        assert!(!reference.contains_key(&key));
                        assert!(TreeError::KeyNotFound.matches(&err));
                    }
                }
            }
            TreeOperation::Find { key } => {
                let key = format!("{key:05}").into_bytes();
                let got = tree.find(root, &key).unwrap();
                match reference.get(&key) {
                    Some(want) => {
                        let (value, rank) = got.unwrap();
                        assert_eq!(&value, want);
                        let (bk, _) = tree.by_index(root, rank).unwrap();
                        assert_eq!(bk, key);
                    }
                    None => assert!(got.is_none()),
                }
            }
            TreeOperation::Snapshot => {
                alloc.freeze_all();
                root = tree.clone_root((), root).unwrap();
            }
        }
    }

    let stats = tree.check(root).unwrap();
    assert_eq!(stats.keys as usize, reference.len());

    let mut expected = reference.iter();
    let done = tree
        .scan(root, None, &mut |_, key, value| {
            let (want_key, want_value) = expected.next().unwrap();
            assert_eq!(key, want_key.as_slice());
            assert_eq!(value, want_value.as_slice());
            true
        })
        .unwrap();
    assert!(done);
});
