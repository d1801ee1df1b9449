//! # critbit-rs
//!
//! An ordered map over byte-string keys using a crit-bit (binary PATRICIA)
//! trie.
//!
//! Based on "Crit-bit trees" (see
//! <http://www.imperialviolet.org/binary/critbit.pdf>).
//!
//! Internal nodes store only a critical (byte, bit) position; full keys live
//! in the leaves, so lookups descend "confidently" to some leaf and verify
//! with a single full comparison. Ordered navigation (first/last, next/prev,
//! ceil/floor, prefix scans) is recomputed by re-walking from the root:
//! leaves carry no successor/predecessor links, trading O(depth) work per
//! step for zero extra per-leaf storage.
//!
//! Keys are compared with an implicit zero terminator, so a key that is a
//! proper prefix of another sorts first. Keys that differ only by trailing
//! 0x00 bytes are not distinguishable.
//!
//! ## Example
//!
//! ```rust
//! use critbit_rs::CritbitTree;
//!
//! let mut tree: CritbitTree<u64> = CritbitTree::new();
//! tree.insert(b"hello", 1);
//! tree.insert(b"world", 2);
//!
//! assert_eq!(tree.get(b"hello"), Some(&1));
//! assert_eq!(tree.get(b"world"), Some(&2));
//! ```

// =============================================================================
// Bit utilities
// =============================================================================

/// Returns the byte where each bit is 1 except for the bit corresponding to
/// the leading bit of `x`. Storing the crit bit in this inverted-mask form
/// simplifies [`decide`].
#[inline]
fn to_mask(mut x: u8) -> u8 {
    debug_assert_ne!(x, 0);
    // SWAR trick that sets every bit after the leading bit to 1.
    x |= x >> 1;
    x |= x >> 2;
    x |= x >> 4;
    // Zero all the bits after the leading bit, then invert.
    (x & !(x >> 1)) ^ 0xFF
}

/// Which side of a node a byte falls on: 0 if the crit bit is clear, 1 if set.
#[inline]
fn decide(c: u8, mask: u8) -> usize {
    ((1u32 + u32::from(mask | c)) >> 8) as usize
}

/// Byte of `key` at `i`, reading past-the-end bytes as the implicit zero
/// terminator. For every valid mask `decide(0, mask) == 0`, so a key shorter
/// than a node's critical byte always follows child 0, which is all a
/// confident descent needs: any leaf works for the verifying comparison.
#[inline]
fn byte_at(key: &[u8], i: usize) -> u8 {
    key.get(i).copied().unwrap_or(0)
}

/// Total order over critical positions, byte index first, then mask. A more
/// significant crit bit has a smaller inverted mask, so it sorts first within
/// its byte.
#[inline]
fn crit_order(byte: usize, mask: u8) -> u64 {
    ((byte as u64) << 8) | u64::from(mask)
}

/// First position at which two keys differ, as a (byte index, inverted mask)
/// pair, or `None` if they are identical (including the implicit terminator).
fn crit_pos(a: &[u8], b: &[u8]) -> Option<(usize, u8)> {
    let n = a.len().max(b.len());
    for i in 0..n {
        let x = byte_at(a, i) ^ byte_at(b, i);
        if x != 0 {
            return Some((i, to_mask(x)));
        }
    }
    None
}

// =============================================================================
// Node model
// =============================================================================
//
// A reference is either a branch (internal decision node) or a leaf, both
// addressed as indices into per-kind slabs. The original C implementation
// distinguished the two by stealing a pointer alignment bit; the enum makes
// misclassification impossible and removes the alignment assumption.

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum NodeRef {
    Branch(u32),
    Leaf(u32),
}

/// One decision point: test the crit bit `!mask` within byte `byte` of the
/// key and descend into `kids[0]` (bit clear) or `kids[1]` (bit set).
#[derive(Clone, Copy, Debug)]
struct Branch {
    byte: u32,
    mask: u8,
    kids: [NodeRef; 2],
}

#[derive(Clone, Debug)]
struct Leaf<V> {
    key: Box<[u8]>,
    value: V,
}

/// A position in a tree, pointing at one stored entry.
///
/// Obtained from [`CritbitTree::find`], [`CritbitTree::first`] and the other
/// navigation calls; read through [`CritbitTree::key`] and
/// [`CritbitTree::value`]. A cursor stays valid only until the next mutation
/// of the tree it came from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Cursor(u32);

/// The slot a node reference lives in: the root, or one child of a branch.
#[derive(Clone, Copy)]
enum Link {
    Root,
    Kid(u32, usize),
}

// =============================================================================
// CritbitTree
// =============================================================================

/// An ordered map from byte strings to values, stored as a crit-bit trie.
///
/// Every operation is a single- or double-pass descent bounded by the trie
/// depth (itself bounded by key length in bits). Insertion allocates exactly
/// one branch and one leaf; deletion frees exactly one of each. There is no
/// rebalancing.
#[derive(Clone)]
pub struct CritbitTree<V> {
    branches: Vec<Branch>,
    free_branches: Vec<u32>,
    leaves: Vec<Option<Leaf<V>>>,
    free_leaves: Vec<u32>,
    root: Option<NodeRef>,
    count: usize,
}

impl<V> CritbitTree<V> {
    pub fn new() -> Self {
        Self {
            branches: Vec::new(),
            free_branches: Vec::new(),
            leaves: Vec::new(),
            free_leaves: Vec::new(),
            root: None,
            count: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Drops every entry and resets the slabs.
    pub fn clear(&mut self) {
        self.branches.clear();
        self.free_branches.clear();
        self.leaves.clear();
        self.free_leaves.clear();
        self.root = None;
        self.count = 0;
    }

    // =========================================================================
    // Slab accessors
    // =========================================================================

    #[inline]
    fn branch(&self, idx: u32) -> &Branch {
        &self.branches[idx as usize]
    }

    #[inline]
    fn leaf(&self, idx: u32) -> &Leaf<V> {
        self.leaves[idx as usize]
            .as_ref()
            .expect("leaf slot must be live")
    }

    #[inline]
    fn leaf_mut(&mut self, idx: u32) -> &mut Leaf<V> {
        self.leaves[idx as usize]
            .as_mut()
            .expect("leaf slot must be live")
    }

    fn alloc_leaf(&mut self, key: &[u8], value: V) -> u32 {
        let leaf = Leaf {
            key: key.into(),
            value,
        };
        if let Some(idx) = self.free_leaves.pop() {
            self.leaves[idx as usize] = Some(leaf);
            return idx;
        }
        let idx = self.leaves.len();
        assert!(idx <= u32::MAX as usize, "leaf slab overflow: {idx} entries");
        self.leaves.push(Some(leaf));
        idx as u32
    }

    fn free_leaf(&mut self, idx: u32) -> Leaf<V> {
        self.free_leaves.push(idx);
        self.leaves[idx as usize]
            .take()
            .expect("freed leaf slot must be live")
    }

    fn alloc_branch(&mut self, branch: Branch) -> u32 {
        if let Some(idx) = self.free_branches.pop() {
            self.branches[idx as usize] = branch;
            return idx;
        }
        let idx = self.branches.len();
        assert!(
            idx <= u32::MAX as usize,
            "branch slab overflow: {idx} entries"
        );
        self.branches.push(branch);
        idx as u32
    }

    #[inline]
    fn free_branch(&mut self, idx: u32) {
        self.free_branches.push(idx);
    }

    #[inline]
    fn link_target(&self, link: Link) -> NodeRef {
        match link {
            Link::Root => self.root.expect("link into an empty tree"),
            Link::Kid(b, dir) => self.branch(b).kids[dir],
        }
    }

    #[inline]
    fn set_link(&mut self, link: Link, r: NodeRef) {
        match link {
            Link::Root => self.root = Some(r),
            Link::Kid(b, dir) => self.branches[b as usize].kids[dir] = r,
        }
    }

    // =========================================================================
    // Descent
    // =========================================================================

    /// Walks down the tree as if the key were present and returns the leaf
    /// reached. The caller must verify with a full key comparison.
    fn confident_leaf(&self, key: &[u8]) -> Option<u32> {
        let mut p = self.root?;
        loop {
            match p {
                NodeRef::Leaf(l) => return Some(l),
                NodeRef::Branch(b) => {
                    let br = self.branch(b);
                    p = br.kids[decide(byte_at(key, br.byte as usize), br.mask)];
                }
            }
        }
    }

    /// Follows child `dir` all the way down to a leaf.
    fn descend_extreme(&self, mut p: NodeRef, dir: usize) -> Cursor {
        loop {
            match p {
                NodeRef::Leaf(l) => return Cursor(l),
                NodeRef::Branch(b) => p = self.branch(b).kids[dir],
            }
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Returns a cursor to the entry with this key. Keys are compared under
    /// the implicit terminator, the same equality every mutation uses, so a
    /// trailing run of 0x00 bytes never distinguishes keys.
    pub fn find(&self, key: &[u8]) -> Option<Cursor> {
        let l = self.confident_leaf(key)?;
        crit_pos(&self.leaf(l).key, key)
            .is_none()
            .then_some(Cursor(l))
    }

    pub fn get(&self, key: &[u8]) -> Option<&V> {
        self.find(key).map(|c| self.value(c))
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        let c = self.find(key)?;
        Some(self.value_mut(c))
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.find(key).is_some()
    }

    /// Key of the entry under a cursor.
    #[inline]
    pub fn key(&self, cursor: Cursor) -> &[u8] {
        &self.leaf(cursor.0).key
    }

    /// Value of the entry under a cursor.
    #[inline]
    pub fn value(&self, cursor: Cursor) -> &V {
        &self.leaf(cursor.0).value
    }

    #[inline]
    pub fn value_mut(&mut self, cursor: Cursor) -> &mut V {
        &mut self.leaf_mut(cursor.0).value
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Inserts a key/value pair, returning the previous value if the key was
    /// already present.
    pub fn insert(&mut self, key: &[u8], value: V) -> Option<V> {
        let Some(leaf_idx) = self.confident_leaf(key) else {
            let l = self.alloc_leaf(key, value);
            self.root = Some(NodeRef::Leaf(l));
            self.count = 1;
            return None;
        };
        match crit_pos(&self.leaf(leaf_idx).key, key) {
            None => Some(std::mem::replace(&mut self.leaf_mut(leaf_idx).value, value)),
            Some((byte, mask)) => {
                self.splice(key, value, byte, mask);
                None
            }
        }
    }

    /// Inserts only if the key is absent; the existing value is kept
    /// otherwise. Returns whether an insertion occurred.
    pub fn insert_if_absent(&mut self, key: &[u8], value: V) -> bool {
        let Some(leaf_idx) = self.confident_leaf(key) else {
            let l = self.alloc_leaf(key, value);
            self.root = Some(NodeRef::Leaf(l));
            self.count = 1;
            return true;
        };
        match crit_pos(&self.leaf(leaf_idx).key, key) {
            None => false,
            Some((byte, mask)) => {
                self.splice(key, value, byte, mask);
                true
            }
        }
    }

    /// Grows the trie by one branch/leaf pair at the unique position given by
    /// the crit position of the new key.
    fn splice(&mut self, key: &[u8], value: V, byte: usize, mask: u8) {
        debug_assert!(byte <= u32::MAX as usize, "key too long for crit byte");
        let ndir = decide(byte_at(key, byte), mask);
        let order = crit_order(byte, mask);

        // Find the first slot on the path whose crit position is not less
        // than ours, or the leaf slot. On this walk every branch tested has
        // its critical byte within the key, so the descent is exact.
        let mut link = Link::Root;
        loop {
            match self.link_target(link) {
                NodeRef::Leaf(_) => break,
                NodeRef::Branch(b) => {
                    let br = self.branch(b);
                    if order < crit_order(br.byte as usize, br.mask) {
                        break;
                    }
                    link = Link::Kid(b, decide(byte_at(key, br.byte as usize), br.mask));
                }
            }
        }

        // The displaced subtree becomes one child; the new leaf the other.
        let displaced = self.link_target(link);
        let new_leaf = NodeRef::Leaf(self.alloc_leaf(key, value));
        let mut kids = [displaced; 2];
        kids[ndir] = new_leaf;
        let b = self.alloc_branch(Branch {
            byte: byte as u32,
            mask,
            kids,
        });
        self.set_link(link, NodeRef::Branch(b));
        self.count += 1;
    }

    /// Removes a key, returning its value if it was present.
    ///
    /// Exactly one leaf is removed and its parent branch collapses into the
    /// sibling subtree; no other node changes.
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        let mut p = self.root?;
        let mut parent: Option<(Link, u32, usize)> = None;
        let mut link_to_p = Link::Root;
        loop {
            match p {
                NodeRef::Branch(b) => {
                    // Branches past the key length read the terminator and
                    // follow child 0, where a leaf equal to the key under the
                    // implicit-terminator comparison must live.
                    let br = *self.branch(b);
                    let dir = decide(byte_at(key, br.byte as usize), br.mask);
                    parent = Some((link_to_p, b, dir));
                    link_to_p = Link::Kid(b, dir);
                    p = br.kids[dir];
                }
                NodeRef::Leaf(l) => {
                    if crit_pos(&self.leaf(l).key, key).is_some() {
                        return None;
                    }
                    let leaf = self.free_leaf(l);
                    self.count -= 1;
                    match parent {
                        None => self.root = None,
                        Some((parent_link, b, dir)) => {
                            // The sibling rises into the parent's slot.
                            let sibling = self.branch(b).kids[1 - dir];
                            self.set_link(parent_link, sibling);
                            self.free_branch(b);
                        }
                    }
                    return Some(leaf.value);
                }
            }
        }
    }

    // =========================================================================
    // Ordered navigation
    // =========================================================================

    /// Cursor to the smallest key.
    pub fn first(&self) -> Option<Cursor> {
        self.root.map(|r| self.descend_extreme(r, 0))
    }

    /// Cursor to the largest key.
    pub fn last(&self) -> Option<Cursor> {
        self.root.map(|r| self.descend_extreme(r, 1))
    }

    /// Re-descends from the root along the cursor's key, remembering the
    /// sibling subtree each time the branch taken points away from the query
    /// direction; the deepest remembered sibling holds the neighbor.
    /// `way` 0 steps toward larger keys, 1 toward smaller.
    fn step(&self, cursor: Cursor, way: usize) -> Option<Cursor> {
        let key = &self.leaf(cursor.0).key;
        let mut p = self.root.expect("cursor into an empty tree");
        let mut other: Option<NodeRef> = None;
        loop {
            match p {
                NodeRef::Leaf(l) => {
                    debug_assert_eq!(l, cursor.0, "cursor key must lead back to its own leaf");
                    break;
                }
                NodeRef::Branch(b) => {
                    let br = self.branch(b);
                    let dir = decide(byte_at(key, br.byte as usize), br.mask);
                    if dir == way {
                        other = Some(br.kids[1 - way]);
                    }
                    p = br.kids[dir];
                }
            }
        }
        other.map(|o| self.descend_extreme(o, way))
    }

    /// Cursor to the smallest key strictly greater than the cursor's.
    pub fn next(&self, cursor: Cursor) -> Option<Cursor> {
        self.step(cursor, 0)
    }

    /// Cursor to the largest key strictly smaller than the cursor's.
    pub fn prev(&self, cursor: Cursor) -> Option<Cursor> {
        self.step(cursor, 1)
    }

    /// Nearest-neighbor search shared by [`ceil`](Self::ceil) and
    /// [`floor`](Self::floor).
    ///
    /// After the confident descent pins down the true divergence point, the
    /// re-descent stops at the lowest common ancestor of the sought key and
    /// its neighbors: the first node whose crit position is not less than the
    /// divergence. The stopping subtree itself is a candidate when the key's
    /// own side there matches the query direction.
    fn seek(&self, key: &[u8], way: usize) -> Option<Cursor> {
        let leaf_idx = self.confident_leaf(key)?;
        let (byte, mask) = match crit_pos(&self.leaf(leaf_idx).key, key) {
            None => return Some(Cursor(leaf_idx)),
            Some(pos) => pos,
        };
        let ndir = decide(byte_at(key, byte), mask);
        let order = crit_order(byte, mask);

        let mut p = self.root.expect("confident descent reached a leaf");
        let mut other: Option<NodeRef> = None;
        loop {
            match p {
                NodeRef::Leaf(_) => break,
                NodeRef::Branch(b) => {
                    let br = self.branch(b);
                    if order < crit_order(br.byte as usize, br.mask) {
                        break;
                    }
                    let dir = decide(byte_at(key, br.byte as usize), br.mask);
                    if dir == way {
                        other = Some(br.kids[1 - way]);
                    }
                    p = br.kids[dir];
                }
            }
        }
        if ndir == way {
            other = Some(p);
        }
        other.map(|o| self.descend_extreme(o, way))
    }

    /// Cursor to the smallest key greater than or equal to `key`.
    pub fn ceil(&self, key: &[u8]) -> Option<Cursor> {
        self.seek(key, 0)
    }

    /// Cursor to the largest key smaller than or equal to `key`.
    pub fn floor(&self, key: &[u8]) -> Option<Cursor> {
        self.seek(key, 1)
    }

    // =========================================================================
    // Prefix enumeration
    // =========================================================================

    /// Visits every entry whose key starts with `prefix`, in key order.
    ///
    /// The visitor returns `false` to halt enumeration early; the method
    /// returns `false` iff it was halted. An empty prefix visits the whole
    /// map.
    pub fn for_each_prefixed<F>(&self, prefix: &[u8], mut visitor: F) -> bool
    where
        F: FnMut(&[u8], &V) -> bool,
    {
        let Some(root) = self.root else {
            return true;
        };

        // Any branch deciding a byte at or past the prefix length has both
        // children within the prefix; follow child 0 to reach a boundary
        // leaf. `top` tracks the subtree under the last in-prefix decision:
        // the prefix subtree root.
        let mut p = root;
        let mut top = root;
        let reached = loop {
            match p {
                NodeRef::Leaf(l) => break l,
                NodeRef::Branch(b) => {
                    let br = self.branch(b);
                    if br.byte as usize >= prefix.len() {
                        p = br.kids[0];
                    } else {
                        p = br.kids[decide(byte_at(prefix, br.byte as usize), br.mask)];
                        top = p;
                    }
                }
            }
        };
        if !self.leaf(reached).key.starts_with(prefix) {
            return true;
        }

        // 0-then-1 preorder over the prefix subtree, with an explicit stack
        // so adversarially deep tries cannot exhaust the call stack.
        let mut stack = vec![top];
        while let Some(q) = stack.pop() {
            match q {
                NodeRef::Leaf(l) => {
                    let leaf = self.leaf(l);
                    if !visitor(&leaf.key, &leaf.value) {
                        return false;
                    }
                }
                NodeRef::Branch(b) => {
                    let br = self.branch(b);
                    stack.push(br.kids[1]);
                    stack.push(br.kids[0]);
                }
            }
        }
        true
    }

    /// Ordered iterator over all entries. Each step re-walks from the root,
    /// so a full scan costs O(n · depth).
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            tree: self,
            cursor: self.first(),
        }
    }

    // =========================================================================
    // Accounting
    // =========================================================================

    /// Bytes of node storage reachable from the root, excluding the key bytes
    /// themselves.
    pub fn overhead(&self) -> usize {
        let mut n = std::mem::size_of::<Self>();
        let Some(root) = self.root else {
            return n;
        };
        let mut stack = vec![root];
        while let Some(p) = stack.pop() {
            match p {
                NodeRef::Leaf(_) => n += std::mem::size_of::<Leaf<V>>(),
                NodeRef::Branch(b) => {
                    n += std::mem::size_of::<Branch>();
                    let br = self.branch(b);
                    stack.push(br.kids[0]);
                    stack.push(br.kids[1]);
                }
            }
        }
        n
    }

    /// Total allocated capacity, slab bookkeeping and key bytes included.
    pub fn memory_usage(&self) -> usize {
        self.branches.capacity() * std::mem::size_of::<Branch>()
            + self.free_branches.capacity() * std::mem::size_of::<u32>()
            + self.leaves.capacity() * std::mem::size_of::<Option<Leaf<V>>>()
            + self.free_leaves.capacity() * std::mem::size_of::<u32>()
            + self
                .leaves
                .iter()
                .flatten()
                .map(|leaf| leaf.key.len())
                .sum::<usize>()
    }
}

impl<V> Default for CritbitTree<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: std::fmt::Debug> std::fmt::Debug for CritbitTree<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

pub struct Iter<'a, V> {
    tree: &'a CritbitTree<V>,
    cursor: Option<Cursor>,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a [u8], &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let c = self.cursor?;
        self.cursor = self.tree.next(c);
        Some((self.tree.key(c), self.tree.value(c)))
    }
}


#[cfg(test)]
mod proptests;
