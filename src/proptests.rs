use super::*;

use proptest::prelude::*;
use std::collections::BTreeMap;

/// Checks every structural invariant reachable from the root: crit positions
/// strictly increase along any path, each leaf sits on the side of every
/// ancestor that its own key's crit bit dictates, and the reachable leaf
/// count matches `len()`.
fn validate_tree<V>(t: &CritbitTree<V>) {
    fn walk<V>(t: &CritbitTree<V>, p: NodeRef, path: &mut Vec<(u32, u8, usize)>, leaves: &mut usize) {
        match p {
            NodeRef::Leaf(l) => {
                let leaf = t.leaves[l as usize]
                    .as_ref()
                    .expect("reachable leaf slot must be live");
                for &(byte, mask, dir) in path.iter() {
                    assert_eq!(
                        decide(byte_at(&leaf.key, byte as usize), mask),
                        dir,
                        "leaf on the wrong side of an ancestor branch"
                    );
                }
                *leaves += 1;
            }
            NodeRef::Branch(b) => {
                let br = t.branches[b as usize];
                let order = crit_order(br.byte as usize, br.mask);
                if let Some(&(pb, pm, _)) = path.last() {
                    assert!(
                        order > crit_order(pb as usize, pm),
                        "crit positions must strictly increase along a path"
                    );
                }
                assert_ne!(br.mask, 0xFF, "mask must leave the crit bit clear");
                for dir in 0..2 {
                    path.push((br.byte, br.mask, dir));
                    walk(t, br.kids[dir], path, leaves);
                    path.pop();
                }
            }
        }
    }

    let mut leaves = 0usize;
    if let Some(root) = t.root {
        let mut path = Vec::new();
        walk(t, root, &mut path, &mut leaves);
    }
    assert_eq!(leaves, t.count, "reachable leaf count must match len()");
}

#[derive(Clone, Debug)]
enum Op {
    Insert(Vec<u8>, u64),
    Remove(Vec<u8>),
    Get(Vec<u8>),
    Ceil(Vec<u8>),
    Floor(Vec<u8>),
    Prefix(Vec<u8>),
}

fn key_strategy() -> impl Strategy<Value = Vec<u8>> + Clone {
    // Most string-like keys never contain 0x00 bytes. This avoids the
    // inherited limitation where keys that differ only by trailing 0x00
    // bytes are not distinguishable at the bit level.
    prop::collection::vec(1u8..=255, 0..=24)
}

fn prefix_strategy() -> impl Strategy<Value = Vec<u8>> + Clone {
    // A small alphabet so that prefixes actually match stored keys.
    prop::collection::vec(b'a'..=b'f', 0..=3)
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let key = key_strategy();
    let op = prop_oneof![
        45 => (key.clone(), any::<u64>()).prop_map(|(k, v)| Op::Insert(k, v)),
        20 => key.clone().prop_map(Op::Remove),
        15 => key.clone().prop_map(Op::Get),
        8 => key.clone().prop_map(Op::Ceil),
        8 => key.clone().prop_map(Op::Floor),
        4 => prefix_strategy().prop_map(Op::Prefix),
    ];
    prop::collection::vec(op, 0..=1500)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence_with_btreemap(ops in ops_strategy()) {
        let mut t: CritbitTree<u64> = CritbitTree::new();
        let mut m: BTreeMap<Vec<u8>, u64> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(key, value) => {
                    let old_t = t.insert(&key, value);
                    let old_m = m.insert(key, value);
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Remove(key) => {
                    let old_t = t.remove(&key);
                    let old_m = m.remove(key.as_slice());
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Get(key) => {
                    let got_t = t.get(&key).copied();
                    let got_m = m.get(key.as_slice()).copied();
                    prop_assert_eq!(got_t, got_m);
                }
                Op::Ceil(key) => {
                    let got_t = t.ceil(&key).map(|c| t.key(c).to_vec());
                    let got_m = m.range(key..).next().map(|(k, _)| k.clone());
                    prop_assert_eq!(got_t, got_m);
                }
                Op::Floor(key) => {
                    let got_t = t.floor(&key).map(|c| t.key(c).to_vec());
                    let got_m = m.range(..=key).next_back().map(|(k, _)| k.clone());
                    prop_assert_eq!(got_t, got_m);
                }
                Op::Prefix(prefix) => {
                    let mut got_t = Vec::new();
                    t.for_each_prefixed(&prefix, |k, v| {
                        got_t.push((k.to_vec(), *v));
                        true
                    });
                    let got_m: Vec<(Vec<u8>, u64)> = m
                        .iter()
                        .filter(|(k, _)| k.starts_with(&prefix))
                        .map(|(k, v)| (k.clone(), *v))
                        .collect();
                    prop_assert_eq!(got_t, got_m);
                }
            }

            prop_assert_eq!(t.len(), m.len());
        }

        validate_tree(&t);
        let got: Vec<(Vec<u8>, u64)> = t.iter().map(|(k, v)| (k.to_vec(), *v)).collect();
        let expected: Vec<(Vec<u8>, u64)> = m.iter().map(|(k, v)| (k.clone(), *v)).collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_reverse_walk_matches_forward(keys in prop::collection::btree_set(key_strategy(), 0..=200)) {
        let mut t: CritbitTree<u64> = CritbitTree::new();
        for (i, k) in keys.iter().enumerate() {
            t.insert(k, i as u64);
        }

        let forward: Vec<Vec<u8>> = t.iter().map(|(k, _)| k.to_vec()).collect();

        let mut backward = Vec::new();
        let mut c = t.last();
        while let Some(cur) = c {
            backward.push(t.key(cur).to_vec());
            c = t.prev(cur);
        }
        backward.reverse();

        prop_assert_eq!(forward, backward);
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

#[test]
fn exhaustive_insert_order_small_set() {
    let keys: Vec<Vec<u8>> = vec![
        b"a".to_vec(),
        b"b".to_vec(),
        b"c".to_vec(),
        b"aa".to_vec(),
        b"ab".to_vec(),
        b"ba".to_vec(),
    ];

    for_each_permutation(&keys, |perm| {
        let mut t: CritbitTree<u64> = CritbitTree::new();
        let mut m: BTreeMap<Vec<u8>, u64> = BTreeMap::new();

        for (i, k) in perm.into_iter().enumerate() {
            let v = i as u64;
            assert_eq!(t.insert(&k, v), m.insert(k, v));
        }

        validate_tree(&t);
        let got: Vec<(Vec<u8>, u64)> = t.iter().map(|(k, v)| (k.to_vec(), *v)).collect();
        let expected: Vec<(Vec<u8>, u64)> = m.iter().map(|(k, v)| (k.clone(), *v)).collect();
        assert_eq!(got, expected);
    });
}

#[test]
fn exhaustive_remove_order_small_set() {
    let keys: Vec<Vec<u8>> = vec![
        b"a".to_vec(),
        b"b".to_vec(),
        b"c".to_vec(),
        b"aa".to_vec(),
        b"ab".to_vec(),
        b"ba".to_vec(),
    ];

    // Insert in a fixed order, then remove in all permutations.
    let mut base_tree: CritbitTree<u64> = CritbitTree::new();
    let mut base_map: BTreeMap<Vec<u8>, u64> = BTreeMap::new();
    for (i, k) in keys.iter().enumerate() {
        let v = i as u64;
        assert_eq!(base_tree.insert(k, v), base_map.insert(k.clone(), v));
    }

    for_each_permutation(&keys, |perm| {
        let mut t = base_tree.clone();
        let mut m = base_map.clone();

        for k in perm {
            assert_eq!(t.remove(&k), m.remove(k.as_slice()));
            assert_eq!(t.len(), m.len());
            validate_tree(&t);
        }
        assert_eq!(t.len(), 0);
        assert!(t.root.is_none());
    });
}
