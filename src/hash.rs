//! Deterministic hashing data structures.
//!
//! The standard library `HashMap` is randomly seeded, which makes run
//! output depend on the process. Simulation results must be
//! reproducible from the configured seed alone, so every map and set
//! in the engine uses the deterministic variants exported here.
//!
//! `HashMap<K, V, S>` does not have a `new` method for a non-default
//! hasher; use `HashMap::default()` or bring [`HashMapExt`] into scope
//! for API parity with `std::collections::HashMap`.

pub use rustc_hash::FxHashMap as HashMap;
pub use rustc_hash::FxHashSet as HashSet;
use xxhash_rust::const_xxh3::xxh3_64 as const_xxh3_64;
use xxhash_rust::xxh3::xxh3_64;

/// Provides API parity with `std::collections::HashMap`.
pub trait HashMapExt {
    fn new() -> Self;
}

impl<K, V> HashMapExt for HashMap<K, V> {
    fn new() -> Self {
        HashMap::default()
    }
}

/// Provides API parity with `std::collections::HashSet`.
pub trait HashSetExt {
    fn new() -> Self;
}

impl<T> HashSetExt for HashSet<T> {
    fn new() -> Self {
        HashSet::default()
    }
}

/// A stable hash of a `&str`, used to derive per-stream seed offsets.
#[must_use]
pub fn hash_str(data: &str) -> u64 {
    xxh3_64(data.as_bytes())
}

/// Const-evaluable variant of [`hash_str`] for static stream names.
#[must_use]
pub const fn hash_str_const(data: &str) -> u64 {
    const_xxh3_64(data.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_str_is_stable() {
        let a = hash_str("transmission");
        let b = hash_str("transmission");
        let c = hash_str("demographics");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn const_and_runtime_agree() {
        const H: u64 = hash_str_const("sexual_network");
        assert_eq!(H, hash_str("sexual_network"));
    }

    #[test]
    fn map_ext_new() {
        let mut m: HashMap<u32, u32> = HashMap::new();
        m.insert(1, 2);
        assert_eq!(m.get(&1), Some(&2));
    }
}
