use itertools::Itertools;
use proptest::{collection::vec, prelude::*, sample::SizeRange};

use crate::prelude::*;

/// Generates distinct fixed-width keys. Trees assume real keys share one
/// length, so strategies produce a single width per run.
pub fn keys(width: usize, size: impl Into<SizeRange>) -> impl Strategy<Value = Vec<Key>> {
    vec(vec(any::<u8>(), width), size).prop_map(|keys| {
        keys.into_iter()
            .map(Key::new)
            .unique()
            .collect_vec()
    })
}

/// Generates distinct fixed-width keys, each paired with an arbitrary value
/// hash.
pub fn entries(width: usize, size: impl Into<SizeRange>) -> impl Strategy<Value = Vec<(Key, Hash)>> {
    vec((vec(any::<u8>(), width), any::<Hash>()), size).prop_map(|pairs| {
        pairs
            .into_iter()
            .map(|(key, value)| (Key::new(key), value))
            .unique_by(|(key, _)| key.clone())
            .collect_vec()
    })
}
