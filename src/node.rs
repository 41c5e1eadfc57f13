use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;

use digest::Digest;
use log::trace;

use crate::prelude::*;

/// A single `(key, value hash, child hash)` triple within a [`Node`].
///
/// Entry identity and ordering are by key alone. The zero-length key marks
/// the sentinel entry: it carries no value, and its child pointer is the
/// node's leftmost subtree, holding every key smaller than the node's first
/// real key. A `None` child marks a leaf entry with no subtree below it.
#[derive(Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Key,
    pub value: Option<Hash>,
    pub child: Option<Hash>,
}

impl Entry {
    pub fn new(key: Key, value: Option<Hash>, child: Option<Hash>) -> Self {
        Self { key, value, child }
    }

    pub fn sentinel(child: Option<Hash>) -> Self {
        Self::new(Key::empty(), None, child)
    }

    pub fn is_sentinel(&self) -> bool {
        self.key.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        self.child.is_none()
    }
}

impl Debug for Entry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let value = self.value.map(|hash| hash.to_string()).unwrap_or_default();
        let child = self.child.map(|hash| hash.to_string()).unwrap_or_default();
        write!(f, "{} -> {} : {}", self.key, value, child)
    }
}

/// Result of inserting into a subtree.
///
/// A split is reported explicitly rather than through the shape of the
/// returned node, so a legitimately small node can never be mistaken for a
/// split signal. Both halves of a split are persisted before the signal is
/// returned; the median entry between them moves up one level, to be grafted
/// into the parent node or materialized into a new root.
pub enum Outcome<D: Digest> {
    /// The subtree absorbed the mutation. The returned node is persisted.
    Unchanged(Node<D>),
    /// The subtree divided around `key`: `left` and `right` address the two
    /// persisted halves.
    Split {
        left: Hash,
        key: Key,
        value: Option<Hash>,
        right: Hash,
    },
}

/// One node of the tree: an ordered set of [`Entry`] values, always led by
/// exactly one sentinel entry.
///
/// Nodes are immutable once persisted. Their identity is the digest of their
/// binary encoding, so every mutation below builds a new entry collection and
/// yields a logically new node; holders of the previous hash keep seeing the
/// previous state.
pub struct Node<D: Digest> {
    entries: Vec<Entry>,
    _digest: PhantomData<D>,
}

impl<D: Digest> Clone for Node<D> {
    fn clone(&self) -> Self {
        Self::from_entries(self.entries.clone())
    }
}

impl<D: Digest> PartialEq for Node<D> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<D: Digest> Eq for Node<D> {}

impl<D: Digest> Debug for Node<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("entries", &self.entries).finish()
    }
}

impl<D: Digest> Node<D> {
    /// Builds a node from `entries`, sorting them and inserting a sentinel
    /// with the given leftmost child pointer when none is present.
    pub fn new(leftmost: Option<Hash>, mut entries: Vec<Entry>) -> Self {
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        if entries.first().map_or(true, |entry| !entry.is_sentinel()) {
            entries.insert(0, Entry::sentinel(leftmost));
        }
        Self::from_entries(entries)
    }

    /// A node holding nothing but a childless sentinel: the empty tree.
    pub fn empty() -> Self {
        Self::new(None, Vec::new())
    }

    /// Entries must already be sorted with the sentinel in front.
    fn from_entries(entries: Vec<Entry>) -> Self {
        Self {
            entries,
            _digest: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() == 1 && self.entries[0].is_leaf()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// The node's content address: the digest of its binary encoding.
    pub fn content_hash(&self) -> Hash {
        Hash::digest::<D>(&self.to_bytes())
    }

    /// Fetches and decodes the node stored under `hash`.
    pub fn load<S: ContentAddressedStorage>(hash: &Hash, store: &S) -> Result<Self> {
        let bytes = store.get(hash)?.ok_or(Error::MissingNode(*hash))?;
        Self::from_bytes(&bytes)
    }

    pub(crate) fn persist<S: ContentAddressedStorage>(&self, store: &mut S) -> Result<Hash> {
        store.put(&self.to_bytes())
    }

    /// Index of the greatest entry whose key is `<=` the sought key. The
    /// sentinel's empty key guarantees a predecessor for any non-empty key.
    fn predecessor(&self, key: &Key) -> usize {
        match self.entries.binary_search_by(|entry| entry.key.cmp(key)) {
            Ok(index) => index,
            Err(index) => index - 1,
        }
    }

    /// Finds the value hash stored under `key`, descending through child
    /// nodes as needed. Read-only: nothing is persisted along the way.
    pub fn lookup<S: ContentAddressedStorage>(&self, key: &Key, store: &S) -> Result<Option<Hash>> {
        let entry = &self.entries[self.predecessor(key)];

        if entry.key == *key {
            return Ok(entry.value);
        }

        match entry.child {
            Some(child) => Self::load(&child, store)?.lookup(key, store),
            None => Ok(None),
        }
    }

    /// Number of non-sentinel entries in the subtree rooted at this node.
    /// Walks every node below; nothing is cached.
    pub fn count<S: ContentAddressedStorage>(&self, store: &S) -> Result<usize> {
        let mut total = self.entries.len() - 1;
        for entry in &self.entries {
            if let Some(child) = entry.child {
                total += Self::load(&child, store)?.count(store)?;
            }
        }
        Ok(total)
    }

    /// Key and value hash of the smallest real entry in this subtree.
    fn smallest_entry<S: ContentAddressedStorage>(&self, store: &S) -> Result<(Key, Option<Hash>)> {
        match self.entries[0].child {
            Some(child) => Self::load(&child, store)?.smallest_entry(store),
            None => {
                // a well-formed leaf holds at least one real entry
                let entry = &self.entries[1];
                Ok((entry.key.clone(), entry.value))
            }
        }
    }

    /// Inserts or replaces `key`, returning the mutated subtree. Every node
    /// returned as [`Outcome::Unchanged`] is persisted; a split leaves both
    /// halves persisted and hands the median up to the caller.
    pub fn insert<S: ContentAddressedStorage>(
        &self,
        key: &Key,
        value: Hash,
        store: &mut S,
        max: usize,
    ) -> Result<Outcome<D>> {
        let index = self.predecessor(key);
        let entry = &self.entries[index];

        // Exact match: swap the value hash in place.
        if entry.key == *key {
            let mut entries = self.entries.clone();
            entries[index].value = Some(value);
            let node = Self::from_entries(entries);
            node.persist(store)?;
            return Ok(Outcome::Unchanged(node));
        }

        let node = match entry.child {
            // Leaf position: the key belongs right after its predecessor.
            None => {
                let mut entries = self.entries.clone();
                entries.insert(index + 1, Entry::new(key.clone(), Some(value), None));
                Self::from_entries(entries)
            }
            // Descend, then graft a child split into this node.
            Some(child) => match Self::load(&child, store)?.insert(key, value, store, max)? {
                Outcome::Unchanged(new_child) => {
                    let mut entries = self.entries.clone();
                    entries[index].child = Some(new_child.content_hash());
                    Self::from_entries(entries)
                }
                Outcome::Split {
                    left,
                    key: median_key,
                    value: median_value,
                    right,
                } => {
                    let mut entries = self.entries.clone();
                    entries[index].child = Some(left);
                    entries.insert(index + 1, Entry::new(median_key, median_value, Some(right)));
                    Self::from_entries(entries)
                }
            },
        };

        if node.len() > max {
            node.split(store)
        } else {
            node.persist(store)?;
            Ok(Outcome::Unchanged(node))
        }
    }

    /// Splits an overflowed node around its positional median. The left half
    /// keeps the sentinel; the right half gets a fresh sentinel pointing at
    /// the median's old child.
    fn split<S: ContentAddressedStorage>(&self, store: &mut S) -> Result<Outcome<D>> {
        let middle = self.entries.len() / 2;
        let median = &self.entries[middle];

        let left = Self::from_entries(self.entries[..middle].to_vec());
        let right = Self::new(median.child, self.entries[middle + 1..].to_vec());

        let left_hash = left.persist(store)?;
        let right_hash = right.persist(store)?;
        trace!("split into {left_hash} and {right_hash}");

        Ok(Outcome::Split {
            left: left_hash,
            key: median.key.clone(),
            value: median.value,
            right: right_hash,
        })
    }

    /// Deletes `key` from the subtree rooted at this node, returning the
    /// mutated node (or an unchanged copy when the key is absent).
    ///
    /// A node is persisted only once its final entry count for the operation
    /// is known: an underflowed node (fewer than `max / 2` entries) is
    /// returned unpersisted, to be rebalanced by the level above or persisted
    /// as-is by the tree handle when it is the root.
    pub fn delete<S: ContentAddressedStorage>(
        &self,
        key: &Key,
        store: &mut S,
        max: usize,
    ) -> Result<Self> {
        let index = self.predecessor(key);
        let entry = &self.entries[index];

        if entry.key == *key {
            return match entry.child {
                // Leaf entry: drop it.
                None => {
                    let mut entries = self.entries.clone();
                    entries.remove(index);
                    let node = Self::from_entries(entries);
                    if node.len() >= max / 2 {
                        node.persist(store)?;
                    }
                    Ok(node)
                }
                // Separator: its subtree still bounds keys, so the entry
                // cannot simply vanish. Promote the subtree's minimum entry
                // into this slot after deleting it down below.
                Some(child_hash) => {
                    let child = Self::load(&child_hash, store)?;
                    let (min_key, min_value) = child.smallest_entry(store)?;
                    let new_child = child.delete(&min_key, store, max)?;

                    let mut entries = self.entries.clone();
                    entries[index] = Entry::new(min_key, min_value, Some(new_child.content_hash()));
                    let node = Self::from_entries(entries);

                    if new_child.len() < max / 2 {
                        node.rebalance(index, new_child, store, max)
                    } else {
                        node.persist(store)?;
                        Ok(node)
                    }
                }
            };
        }

        match entry.child {
            // Key absent.
            None => Ok(self.clone()),
            Some(child_hash) => {
                let new_child = Self::load(&child_hash, store)?.delete(key, store, max)?;

                let mut entries = self.entries.clone();
                entries[index].child = Some(new_child.content_hash());
                let node = Self::from_entries(entries);

                if new_child.len() < max / 2 {
                    node.rebalance(index, new_child, store, max)
                } else {
                    node.persist(store)?;
                    Ok(node)
                }
            }
        }
    }

    /// Fixes up an underflowed `child` sitting under `self.entries[index]`:
    /// borrow from a sibling that can lend, merge with one otherwise.
    fn rebalance<S: ContentAddressedStorage>(
        &self,
        index: usize,
        child: Self,
        store: &mut S,
        max: usize,
    ) -> Result<Self> {
        let min = max / 2;

        let right = match self.entries.get(index + 1) {
            Some(entry) => match entry.child {
                Some(hash) => Some(Self::load(&hash, store)?),
                None => None,
            },
            None => None,
        };
        if let Some(right_node) = &right {
            if right_node.len() > min {
                return self.rotate_left(index, child, right_node, store);
            }
        }

        let left = match index.checked_sub(1).map(|i| &self.entries[i]) {
            Some(entry) => match entry.child {
                Some(hash) => Some(Self::load(&hash, store)?),
                None => None,
            },
            None => None,
        };
        if let Some(left_node) = &left {
            if left_node.len() > min {
                return self.rotate_right(index, left_node, child, store);
            }
        }

        if let Some(right_node) = right {
            self.merge_right(index, child, right_node, store, min)
        } else if let Some(left_node) = left {
            self.merge_left(index, left_node, child, store, min)
        } else {
            unreachable!("an underflowed child always has at least one sibling")
        }
    }

    /// Moves the right sibling's smallest real entry up into the parent and
    /// the old separator for the sibling down into `child`.
    fn rotate_left<S: ContentAddressedStorage>(
        &self,
        index: usize,
        child: Self,
        right: &Self,
        store: &mut S,
    ) -> Result<Self> {
        let separator = &self.entries[index + 1];
        let lent = &right.entries[1];

        let mut child_entries = child.entries;
        child_entries.push(Entry::new(
            separator.key.clone(),
            separator.value,
            right.entries[0].child,
        ));
        let new_child = Self::from_entries(child_entries);
        let child_hash = new_child.persist(store)?;

        let mut right_entries = right.entries[2..].to_vec();
        right_entries.insert(0, Entry::sentinel(lent.child));
        let new_right = Self::from_entries(right_entries);
        let right_hash = new_right.persist(store)?;

        let mut entries = self.entries.clone();
        entries[index].child = Some(child_hash);
        entries[index + 1] = Entry::new(lent.key.clone(), lent.value, Some(right_hash));
        let parent = Self::from_entries(entries);
        parent.persist(store)?;

        trace!("rotated left into {child_hash}");
        Ok(parent)
    }

    /// Moves the left sibling's greatest entry up into the parent and the old
    /// separator for `child` down into it.
    fn rotate_right<S: ContentAddressedStorage>(
        &self,
        index: usize,
        left: &Self,
        child: Self,
        store: &mut S,
    ) -> Result<Self> {
        let separator = &self.entries[index];
        let lent = &left.entries[left.entries.len() - 1];

        let new_left = Self::from_entries(left.entries[..left.entries.len() - 1].to_vec());
        let left_hash = new_left.persist(store)?;

        let mut child_entries = child.entries;
        let old_leftmost = child_entries[0].child;
        child_entries[0] = Entry::sentinel(lent.child);
        child_entries.insert(
            1,
            Entry::new(separator.key.clone(), separator.value, old_leftmost),
        );
        let new_child = Self::from_entries(child_entries);
        let child_hash = new_child.persist(store)?;

        let mut entries = self.entries.clone();
        entries[index - 1].child = Some(left_hash);
        entries[index] = Entry::new(lent.key.clone(), lent.value, Some(child_hash));
        let parent = Self::from_entries(entries);
        parent.persist(store)?;

        trace!("rotated right into {child_hash}");
        Ok(parent)
    }

    /// Joins a left node, the separator between the halves, and a right node
    /// into one node. The left half's sentinel leads the combined node; the
    /// separator drops down to bound the right half, pointing at its old
    /// leftmost subtree.
    fn merged(left: &Self, separator: &Entry, right: &Self) -> Self {
        let mut entries = left.entries.clone();
        entries.push(Entry::new(
            separator.key.clone(),
            separator.value,
            right.entries[0].child,
        ));
        entries.extend_from_slice(&right.entries[1..]);
        Self::from_entries(entries)
    }

    fn merge_right<S: ContentAddressedStorage>(
        &self,
        index: usize,
        child: Self,
        right: Self,
        store: &mut S,
        min: usize,
    ) -> Result<Self> {
        let combined = Self::merged(&child, &self.entries[index + 1], &right);
        let combined_hash = combined.persist(store)?;

        let mut entries = self.entries.clone();
        entries[index].child = Some(combined_hash);
        entries.remove(index + 1);
        let parent = Self::from_entries(entries);

        // an underflowed parent is left for the caller to rebalance
        if parent.len() >= min {
            parent.persist(store)?;
        }
        trace!("merged right sibling into {combined_hash}");
        Ok(parent)
    }

    fn merge_left<S: ContentAddressedStorage>(
        &self,
        index: usize,
        left: Self,
        child: Self,
        store: &mut S,
        min: usize,
    ) -> Result<Self> {
        let combined = Self::merged(&left, &self.entries[index], &child);
        let combined_hash = combined.persist(store)?;

        let mut entries = self.entries.clone();
        entries[index - 1].child = Some(combined_hash);
        entries.remove(index);
        let parent = Self::from_entries(entries);

        if parent.len() >= min {
            parent.persist(store)?;
        }
        trace!("merged left sibling into {combined_hash}");
        Ok(parent)
    }
}

impl<D: Digest> ToBytes for Node<D> {
    type Output = Vec<u8>;

    /// Length-prefixed binary encoding: a 4 byte big-endian entry count, then
    /// for every entry in key order a 4 byte big-endian length plus raw bytes
    /// for the key, the value hash (0 length for the sentinel) and the child
    /// hash (0 length for a leaf entry). Bit-exact across implementations
    /// sharing a store; the content hash is the digest of this encoding.
    fn to_bytes(&self) -> Self::Output {
        fn field(out: &mut Vec<u8>, bytes: &[u8]) {
            out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(bytes);
        }

        let mut out = Vec::new();
        out.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for entry in &self.entries {
            field(&mut out, entry.key.as_ref());
            field(&mut out, entry.value.as_ref().map_or(&[][..], |hash| hash.as_ref()));
            field(&mut out, entry.child.as_ref().map_or(&[][..], |hash| hash.as_ref()));
        }
        out
    }
}

impl<D: Digest> FromBytes for Node<D> {
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader { bytes, offset: 0 };

        let count = reader.length()?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let key = Key::new(reader.field()?);
            let value = reader.hash()?;
            let child = reader.hash()?;
            entries.push(Entry::new(key, value, child));
        }

        if reader.offset != bytes.len() {
            return Err(Error::FailedDeserialization(format!(
                "{} trailing bytes after node encoding",
                bytes.len() - reader.offset
            )));
        }

        Ok(Self::new(None, entries))
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                Error::FailedDeserialization(format!(
                    "node encoding truncated at byte {}",
                    self.offset
                ))
            })?;

        let out = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(out)
    }

    fn length(&mut self) -> Result<usize> {
        let bytes: [u8; 4] = self.take(4)?.try_into()?;
        Ok(u32::from_be_bytes(bytes) as usize)
    }

    fn field(&mut self) -> Result<&'a [u8]> {
        let len = self.length()?;
        self.take(len)
    }

    fn hash(&mut self) -> Result<Option<Hash>> {
        match self.field()? {
            [] => Ok(None),
            bytes => Hash::from_bytes(bytes).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::collection::vec;
    use proptest::prelude::any;
    use sha2::Sha256;
    use test_strategy::proptest;

    use crate::prelude::*;
    use crate::testing::entries;

    fn leaf(pairs: Vec<(Key, Hash)>) -> Node<Sha256> {
        let entries = pairs
            .into_iter()
            .map(|(key, value)| Entry::new(key, Some(value), None))
            .collect();
        Node::new(None, entries)
    }

    #[test]
    fn test_empty_node_encoding() {
        // one sentinel entry, three zero-length fields
        let expected = [
            0, 0, 0, 1, // entry count
            0, 0, 0, 0, // key
            0, 0, 0, 0, // value hash
            0, 0, 0, 0, // child hash
        ];
        assert_eq!(Node::<Sha256>::empty().to_bytes(), expected);
    }

    #[proptest(fork = false)]
    fn test_codec_roundtrip(#[strategy(entries(8, 0..=15))] pairs: Vec<(Key, Hash)>) {
        let node = leaf(pairs);
        assert_eq!(node, Node::<Sha256>::from_bytes(&node.to_bytes())?);
    }

    #[proptest(fork = false)]
    fn test_content_hash_reproducible(#[strategy(entries(8, 0..=15))] pairs: Vec<(Key, Hash)>) {
        let node = leaf(pairs);
        let decoded = Node::<Sha256>::from_bytes(&node.to_bytes())?;
        assert_eq!(node.content_hash(), decoded.content_hash());
    }

    #[proptest(fork = false)]
    fn test_decode_rejects_truncation(#[strategy(entries(8, 1..=15))] pairs: Vec<(Key, Hash)>) {
        let bytes = leaf(pairs).to_bytes();

        for len in 0..bytes.len() {
            assert!(Node::<Sha256>::from_bytes(&bytes[..len]).is_err());
        }
    }

    #[proptest(fork = false)]
    fn test_decode_rejects_trailing_bytes(
        #[strategy(entries(8, 0..=15))] pairs: Vec<(Key, Hash)>,
        #[strategy(vec(any::<u8>(), 1..=16))] garbage: Vec<u8>,
    ) {
        let mut bytes = leaf(pairs).to_bytes();
        bytes.extend_from_slice(&garbage);
        assert!(Node::<Sha256>::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_digest_width() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.push(0xaa); // key
        bytes.extend_from_slice(&3u32.to_be_bytes());
        bytes.extend_from_slice(&[1, 2, 3]); // 3 byte "hash"
        bytes.extend_from_slice(&0u32.to_be_bytes());

        assert!(matches!(
            Node::<Sha256>::from_bytes(&bytes),
            Err(Error::FailedDeserialization(_))
        ));
    }

    #[test]
    fn test_split_signal_shape() {
        let mut store = MemoryStorage::<Sha256>::new();
        let mut node = Node::<Sha256>::empty();

        // 15 distinct keys fill the node to 16 entries, sentinel included
        for i in 0..15u8 {
            let key = Key::new(vec![0, 1, 2, i]);
            let value = Hash::digest::<Sha256>(&[i]);
            node = match node.insert(&key, value, &mut store, 16).unwrap() {
                Outcome::Unchanged(node) => node,
                Outcome::Split { .. } => panic!("premature split"),
            };
        }
        assert_eq!(node.len(), 16);

        let key = Key::new(vec![0, 1, 2, 15]);
        let value = Hash::digest::<Sha256>(&[15]);
        match node.insert(&key, value, &mut store, 16).unwrap() {
            Outcome::Unchanged(_) => panic!("expected a split"),
            Outcome::Split {
                left,
                key: median_key,
                right,
                ..
            } => {
                let left = Node::<Sha256>::load(&left, &store).unwrap();
                let right = Node::<Sha256>::load(&right, &store).unwrap();

                assert_eq!(left.len(), 8);
                assert_eq!(right.len(), 9);
                assert!(left.entries().iter().skip(1).all(|e| e.key < median_key));
                assert!(right.entries().iter().skip(1).all(|e| e.key > median_key));
            }
        }
    }

    #[proptest(fork = false)]
    fn test_lookup_on_leaf(#[strategy(entries(8, 1..=15))] pairs: Vec<(Key, Hash)>) {
        let store = MemoryStorage::<Sha256>::new();
        let node = leaf(pairs.clone());

        for (key, value) in &pairs {
            assert_eq!(node.lookup(key, &store)?, Some(*value));
        }
        assert_eq!(node.lookup(&Key::new(vec![0; 9]), &store)?, None);
    }
}
