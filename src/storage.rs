use std::collections::HashMap;
use std::marker::PhantomData;

use digest::Digest;

use crate::prelude::*;

/// Content-addressed byte storage: every value is stored under the digest of
/// its own bytes.
///
/// The tree requires only these three operations from its backing store. A
/// store must address values with the same digest function the tree uses, or
/// the hashes held inside nodes stop matching the store's keys.
pub trait ContentAddressedStorage {
    /// Stores `value` under the hash of its bytes, returning that hash.
    ///
    /// Storing identical bytes again yields the same hash and may no-op.
    fn put(&mut self, value: &[u8]) -> Result<Hash>;

    /// Returns the bytes stored under `hash`, if any.
    fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>>;

    /// Removes the bytes stored under `hash`. Removing an absent hash is not
    /// an error.
    fn remove(&mut self, hash: &Hash) -> Result<()>;
}

/// In-memory content-addressed storage over the digest `D`.
pub struct MemoryStorage<D: Digest> {
    entries: HashMap<Hash, Vec<u8>>,
    _digest: PhantomData<D>,
}

impl<D: Digest> Clone for MemoryStorage<D> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            _digest: PhantomData,
        }
    }
}

impl<D: Digest> std::fmt::Debug for MemoryStorage<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl<D: Digest> Default for MemoryStorage<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Digest> MemoryStorage<D> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            _digest: PhantomData,
        }
    }

    /// Number of distinct values held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<D: Digest> ContentAddressedStorage for MemoryStorage<D> {
    fn put(&mut self, value: &[u8]) -> Result<Hash> {
        let hash = Hash::digest::<D>(value);
        self.entries.entry(hash).or_insert_with(|| value.to_vec());
        Ok(hash)
    }

    fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(hash).cloned())
    }

    fn remove(&mut self, hash: &Hash) -> Result<()> {
        self.entries.remove(hash);
        Ok(())
    }
}
