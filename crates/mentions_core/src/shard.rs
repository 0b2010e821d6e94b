//! Sharded map of per-key locked entries.
//!
//! # Responsibility
//! - Give every key its own lock so updates to one key are linearizable
//!   while unrelated keys proceed in parallel.
//!
//! # Invariants
//! - A shard lock is only held while looking up, inserting or sweeping
//!   entries; callers lock the returned entry after the shard is released.
//! - `retain` only inspects entries nobody else references, so it never
//!   waits on or removes an entry a caller is holding.

use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

const DEFAULT_SHARDS: usize = 16;

pub struct ShardedMap<K, V> {
    shards: Vec<Mutex<HashMap<K, Arc<Mutex<V>>>>>,
}

impl<K: Hash + Eq + Clone, V> ShardedMap<K, V> {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &K) -> &Mutex<HashMap<K, Arc<Mutex<V>>>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }

    /// Returns the entry for `key`, creating it with `init` when missing.
    pub fn entry_or_insert_with(&self, key: &K, init: impl FnOnce() -> V) -> Arc<Mutex<V>> {
        let mut shard = self.shard(key).lock();
        shard
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(init())))
            .clone()
    }

    pub fn get(&self, key: &K) -> Option<Arc<Mutex<V>>> {
        self.shard(key).lock().get(key).cloned()
    }

    pub fn remove(&self, key: &K) -> Option<Arc<Mutex<V>>> {
        self.shard(key).lock().remove(key)
    }

    /// Removes `key` when `remove` approves its value and nobody else holds
    /// the entry. Returns whether it was removed.
    pub fn remove_if(&self, key: &K, remove: impl FnOnce(&V) -> bool) -> bool {
        let mut shard = self.shard(key).lock();
        let approved = match shard.get(key) {
            Some(entry) if Arc::strong_count(entry) == 1 => remove(&*entry.lock()),
            _ => false,
        };
        if approved {
            shard.remove(key);
        }
        approved
    }

    /// Drops entries for which `keep` returns `false`.
    ///
    /// Entries referenced outside the map are skipped and always kept.
    /// Returns the number of removed entries.
    pub fn retain(&self, mut keep: impl FnMut(&K, &V) -> bool) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            shard.retain(|key, entry| {
                if Arc::strong_count(entry) > 1 {
                    return true;
                }
                let keep_entry = {
                    let value = entry.lock();
                    keep(key, &*value)
                };
                if !keep_entry {
                    removed += 1;
                }
                keep_entry
            });
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Hash + Eq + Clone, V> Default for ShardedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
