use digest::Digest;
use log::trace;

use crate::prelude::*;

/// Default branching factor: the most entries a node may hold before it must
/// split.
pub const DEFAULT_MAX_ENTRIES: usize = 16;

/// Top-level handle tying the tree-node algebra to a content-addressed store.
///
/// The handle owns the store, the current root node and its hash, and the
/// branching factor. Mutations descend from the root, re-persist every node
/// on the mutated path and replace the held root; nodes of previous roots are
/// never removed, so an older root hash keeps resolving to a consistent
/// snapshot for as long as its nodes stay in the store.
///
/// The store must address values with the same digest `D` the tree uses.
pub struct MerkleBTree<D: Digest, S: ContentAddressedStorage> {
    store: S,
    root: Node<D>,
    root_hash: Hash,
    max_entries: usize,
}

impl<D: Digest, S: ContentAddressedStorage> std::fmt::Debug for MerkleBTree<D, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerkleBTree")
            .field("root_hash", &self.root_hash)
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

impl<D: Digest> MerkleBTree<D, MemoryStorage<D>> {
    /// An empty in-memory tree with the default branching factor.
    pub fn in_memory() -> Result<Self> {
        Self::new(MemoryStorage::new(), DEFAULT_MAX_ENTRIES)
    }
}

impl<D: Digest, S: ContentAddressedStorage> MerkleBTree<D, S> {
    /// Creates an empty tree with branching factor `max_entries`, persisting
    /// the empty root into `store`.
    pub fn new(mut store: S, max_entries: usize) -> Result<Self> {
        let root = Node::empty();
        let root_hash = root.persist(&mut store)?;

        Ok(Self {
            store,
            root,
            root_hash,
            max_entries,
        })
    }

    /// Opens a tree at a previously recorded root hash, e.g. to read an
    /// older snapshot of the same store.
    pub fn open(store: S, root_hash: Hash, max_entries: usize) -> Result<Self> {
        let root = Node::load(&root_hash, &store)?;

        Ok(Self {
            store,
            root,
            root_hash,
            max_entries,
        })
    }

    /// The value hash stored under `key`, if any.
    pub fn get(&self, key: &[u8]) -> Result<Option<Hash>> {
        self.root.lookup(&user_key(key)?, &self.store)
    }

    /// Inserts or replaces `key`, persisting every node on the mutated path
    /// and returning the new root hash.
    pub fn put(&mut self, key: &[u8], value: Hash) -> Result<Hash> {
        let key = user_key(key)?;

        match self.root.insert(&key, value, &mut self.store, self.max_entries)? {
            Outcome::Unchanged(root) => {
                self.root_hash = root.content_hash();
                self.root = root;
            }
            // A split signal is a protocol between node levels, never a valid
            // root: materialize it into a genuine two-entry root node.
            Outcome::Split {
                left,
                key,
                value,
                right,
            } => {
                let root = Node::new(Some(left), vec![Entry::new(key, value, Some(right))]);
                self.root_hash = root.persist(&mut self.store)?;
                self.root = root;
                trace!("root split, new root {}", self.root_hash);
            }
        }

        Ok(self.root_hash)
    }

    /// Deletes `key` if present and returns the new root hash. Deleting an
    /// absent key leaves the tree unchanged.
    pub fn delete(&mut self, key: &[u8]) -> Result<Hash> {
        let key = user_key(key)?;
        let node = self.root.delete(&key, &mut self.store, self.max_entries)?;

        // Height reduction: a root holding nothing but a sentinel pointing at
        // a child collapses into that child. A childless lone sentinel is the
        // canonical empty tree.
        let root = match (node.len(), node.entries()[0].child) {
            (1, Some(child)) => {
                trace!("root collapsed into {child}");
                Node::load(&child, &self.store)?
            }
            _ => node,
        };

        // the root is exempt from the minimum-occupancy rule and may come
        // back unpersisted
        self.root_hash = root.persist(&mut self.store)?;
        self.root = root;
        Ok(self.root_hash)
    }

    /// Number of keys in the tree. Walks the whole tree; O(n), not cached.
    pub fn size(&self) -> Result<usize> {
        self.root.count(&self.store)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Hash of the current root node.
    pub fn root_hash(&self) -> Hash {
        self.root_hash
    }

    pub fn root(&self) -> &Node<D> {
        &self.root
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Renders a depth-indented listing of every entry in the tree.
    /// Diagnostic output, not part of the contract.
    pub fn dump(&self) -> Result<String> {
        fn walk<D: Digest, S: ContentAddressedStorage>(
            node: &Node<D>,
            store: &S,
            depth: usize,
            out: &mut String,
        ) -> Result<()> {
            for (index, entry) in node.entries().iter().enumerate() {
                out.push_str(&format!(
                    "{:indent$}[{index}/{len}] {entry:?}\n",
                    "",
                    indent = depth * 3,
                    len = node.len()
                ));
                if let Some(child) = entry.child {
                    walk(&Node::<D>::load(&child, store)?, store, depth + 1, out)?;
                }
            }
            Ok(())
        }

        let mut out = String::new();
        walk(&self.root, &self.store, 0, &mut out)?;
        Ok(out)
    }
}

fn user_key(key: &[u8]) -> Result<Key> {
    if key.is_empty() {
        return Err(Error::EmptyKey);
    }
    Ok(Key::from(key))
}
