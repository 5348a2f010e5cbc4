use std::hash::BuildHasherDefault;

pub type FxHashBuilder = BuildHasherDefault<fxhash::FxHasher>;
pub type FxHashMap<K, V> = hashbrown::HashMap<K, V, FxHashBuilder>;
pub type FxHashSet<T> = hashbrown::HashSet<T, FxHashBuilder>;

/// Hashes a single `u32` with the Fx mixing function. Used by tables that manage their own buckets.
pub fn fx_hash_u32(value: u32) -> u64 {
	fxhash::hash64(&value)
}
