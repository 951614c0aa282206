use std::collections::HashSet;

use crate::core::Key;

/// Collect `keys` into a list with every key appearing once, in the order of
/// first occurrence.
///
/// Deduplication is by key value, never by shard index: two distinct keys
/// sharing a shard are both kept.
pub fn dedup_keys(keys: impl IntoIterator<Item = Key>) -> Vec<Key> {
    let keys = keys.into_iter();
    let mut seen = HashSet::with_capacity(keys.size_hint().0);
    keys.filter(|&key| seen.insert(key)).collect()
}
