//! Abstractions over the collections used by `abraxas`.
//!
//! The hash based containers pick their random state with a cargo
//! feature; the default is a keyed `twox-hash` state. Anything whose
//! iteration order is observable in the emitted actions must use an
//! ordered container instead, since the automaton promises identical
//! action sequences for identical event logs.

use std::hash::Hash;

#[cfg(feature = "collections_randomstate_std")]
pub type RandomState = std::collections::hash_map::RandomState;

#[cfg(feature = "collections_randomstate_twox_hash")]
pub type RandomState = twox_hash::RandomXxHashBuilder64;

/// A map with a feature selected random state.
pub type HashMap<K, V> = std::collections::HashMap<K, V, RandomState>;

/// A set with a feature selected random state.
pub type HashSet<T> = std::collections::HashSet<T, RandomState>;

/// A map preserving insertion order during iteration.
pub type OrderedMap<K, V> = linked_hash_map::LinkedHashMap<K, V, RandomState>;

/// Creates a new `HashMap`.
pub fn hash_map<K, V>() -> HashMap<K, V> {
    HashMap::with_hasher(Default::default())
}

/// Creates a new `HashSet`.
pub fn hash_set<T>() -> HashSet<T> {
    HashSet::with_hasher(Default::default())
}

/// Creates a new `OrderedMap`.
pub fn ordered_map<K: Eq + Hash, V>() -> OrderedMap<K, V> {
    OrderedMap::with_hasher(Default::default())
}
