use std::cmp::Ordering;
use std::fmt::{Debug, Display};

use proptest::{collection::vec, prelude::*};

use crate::prelude::*;

/// An opaque byte-sequence key with a length-first total order.
///
/// Keys are compared by length before content: a shorter key sorts strictly
/// before every longer key, regardless of bytes, and only equal-length keys
/// are compared bytewise (unsigned). The zero-length key therefore precedes
/// every other key, which is what lets each node reserve it for the sentinel
/// entry holding the leftmost child pointer.
///
/// Real keys stored in one tree should share a single fixed length; mixing
/// lengths changes where keys land in the tree.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Key(Vec<u8>);

impl_associate_bytes_types!(Key);

impl Key {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self(data.into())
    }

    /// The zero-length key, reserved for sentinel entries.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Key").field(&self.to_hex()).finish()
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Key {
    fn from(data: Vec<u8>) -> Self {
        Self(data)
    }
}

impl From<&[u8]> for Key {
    fn from(data: &[u8]) -> Self {
        Self(data.to_vec())
    }
}

impl ToBytes for Key {
    type Output = Vec<u8>;

    fn to_bytes(&self) -> Self::Output {
        self.0.clone()
    }
}

impl FromBytes for Key {
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self(bytes.to_vec()))
    }
}

impl Arbitrary for Key {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        vec(any::<u8>(), 0..=32).prop_map(Key::new).boxed()
    }
}
