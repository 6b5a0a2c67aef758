//! Sharded key table with compare-and-swap updates.
//!
//! Values are treated as immutable records: updates replace a record only if
//! the stored one still equals what the caller observed. Each shard lock is
//! held for a single map access and never across an await point, so
//! operations on keys in different shards never contend.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use parking_lot::{Mutex, MutexGuard};

/// Default number of shards (power of 2 for fast modular indexing).
pub const DEFAULT_SHARDS: usize = 64;

pub struct ShardedMap<V> {
    shards: Box<[Mutex<HashMap<String, V>>]>,
}

impl<V: Clone> ShardedMap<V> {
    /// Create a table with `shards` buckets, rounded up to a power of 2.
    pub fn new(shards: usize) -> Self {
        let count = shards.max(1).next_power_of_two();
        Self {
            shards: (0..count).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.shard(key).get(key).cloned()
    }

    /// Return the stored record, inserting `make()` first if absent.
    pub fn get_or_insert_with(&self, key: &str, make: impl FnOnce() -> V) -> V {
        self.shard(key)
            .entry(key.to_string())
            .or_insert_with(make)
            .clone()
    }

    /// Insert `value` unless a record exists. Returns the stored record and
    /// whether it is the one just inserted.
    pub fn insert_if_absent(&self, key: &str, value: V) -> (V, bool) {
        let mut shard = self.shard(key);
        match shard.get(key) {
            Some(existing) => (existing.clone(), false),
            None => {
                shard.insert(key.to_string(), value.clone());
                (value, true)
            }
        }
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.shard(key).remove(key)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard(&self, key: &str) -> MutexGuard<'_, HashMap<String, V>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) & (self.shards.len() - 1);
        self.shards[index].lock()
    }
}

impl<V: Clone + PartialEq> ShardedMap<V> {
    /// Replace the record at `key` with `new` only if it still equals `current`.
    pub fn compare_and_swap(&self, key: &str, current: &V, new: V) -> bool {
        let mut shard = self.shard(key);
        match shard.get_mut(key) {
            Some(stored) if stored == current => {
                *stored = new;
                true
            }
            _ => false,
        }
    }
}
