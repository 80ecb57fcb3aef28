//! In-memory bounded caches owned by individual pipeline components.
//!
//! Each component owns its cache instance and wraps it in the concurrency
//! primitive it needs; nothing here is module-scope global state. Catalog
//! data is read-mostly within a process lifetime, so staleness is tolerated.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

use md5::{Digest, Md5};

/// MD5 hash for long cache keys (prompts, formatted contexts).
pub fn hash_key(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Bounded cache with FIFO eviction. Used for knowledge-search results.
#[derive(Debug)]
pub struct FifoCache<K, V> {
    capacity: usize,
    map: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V: Clone> FifoCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.map.get(key).cloned()
    }

    pub fn put(&mut self, key: K, value: V) {
        if self.map.contains_key(&key) {
            self.map.insert(key, value);
            return;
        }
        if self.order.len() >= self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.map.remove(&oldest);
        }
        self.order.push_back(key.clone());
        self.map.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Bounded cache with per-entry TTL expiry. Used for tool-call results.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    map: HashMap<K, (Instant, V)>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            map: HashMap::new(),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        match self.map.get(key) {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                self.map.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&mut self, key: K, value: V) {
        self.map.insert(key, (Instant::now(), value));
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}
