//! Key fingerprinting.
//
// A `KeyHash` is the `(primary, conflict)` pair used throughout the cache
// to identify a key without storing it: `primary` selects shard/sketch/
// bloom slots, `conflict` disambiguates primary-hash collisions.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A key fingerprint: `(primary, conflict)`.
///
/// Two distinct keys collide only when both numbers are equal (spec
/// §3, `Fingerprint` invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyHash {
    pub primary: u64,
    pub conflict: u64,
}

impl KeyHash {
    pub fn new(primary: u64, conflict: u64) -> Self {
        Self { primary, conflict }
    }
}

/// Pluggable `key -> KeyHash` function, supplied at cache construction.
///
/// Re-architecture note (spec §9, "Reflection-based hashing"): the
/// original dispatches on the runtime type of the key. In a statically
/// typed target we instead require callers to supply this typed
/// function, or fall back to [`default_hasher`] for any `K: Hash`.
pub type HashFn<K> = Arc<dyn Fn(&K) -> KeyHash + Send + Sync>;

/// Default hasher: two independently salted passes of the standard
/// library's `DefaultHasher`. Cheap, allocation-free, and good enough
/// to keep primary/conflict from correlating for typical key types.
pub fn default_hasher<K: Hash>() -> HashFn<K> {
    Arc::new(|key: &K| {
        let mut primary_hasher = DefaultHasher::new();
        key.hash(&mut primary_hasher);
        let primary = primary_hasher.finish();

        let mut conflict_hasher = DefaultHasher::new();
        0x9E3779B97F4A7C15u64.hash(&mut conflict_hasher);
        key.hash(&mut conflict_hasher);
        let conflict = conflict_hasher.finish();

        KeyHash::new(primary, conflict)
    })
}
