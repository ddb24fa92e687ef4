//! Bounded entry cache.
//!
//! [`EntryCache`] keeps at most `max_size` keys. When an insertion pushes it
//! over capacity it asks its [`EvictionPolicy`] for the `cull_n` least
//! valuable keys, repeating until it fits again, and hands the evicted keys
//! back to the caller.

mod mru;
mod timestamp;

pub use mru::MruPolicy;
pub use timestamp::TimestampPolicy;

use heinzel_core::{CachePolicy, Config};
use std::fmt::Debug;
use std::hash::Hash;

/// Ranks cache keys by how valuable they are to keep.
pub trait EvictionPolicy<K>: Debug {
    /// Insert `key`, or refresh it if present.
    fn touch(&mut self, key: &K);

    /// Forget `key`. Returns whether it was present.
    fn remove(&mut self, key: &K) -> bool;

    fn contains(&self, key: &K) -> bool;

    fn len(&self) -> usize;

    /// Remove and return up to `n` of the least valuable keys.
    fn pop_least(&mut self, n: usize) -> Vec<K>;

    fn clear(&mut self);
}

/// Keys kept under a size bound by an eviction policy.
#[derive(Debug)]
pub struct EntryCache<K> {
    policy: Box<dyn EvictionPolicy<K>>,
    max_size: usize,
    cull_n: usize,
}

impl<K> EntryCache<K>
where
    K: Clone + Eq + Hash + Debug + 'static,
{
    pub fn new(policy: Box<dyn EvictionPolicy<K>>, max_size: usize, cull_n: usize) -> Self {
        Self {
            policy,
            max_size: max_size.max(1),
            cull_n: cull_n.max(1),
        }
    }

    /// Cache configured by `config.cache_policy`, `max_cache` and `cull_n`.
    pub fn from_config(config: &Config) -> Self {
        let policy: Box<dyn EvictionPolicy<K>> = match config.cache_policy {
            CachePolicy::Mru => Box::new(MruPolicy::new()),
            CachePolicy::Timestamp => Box::new(TimestampPolicy::new()),
        };
        Self::new(policy, config.max_cache, config.effective_cull_n())
    }

    pub fn len(&self) -> usize {
        self.policy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policy.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn cull_n(&self) -> usize {
        self.cull_n
    }

    /// `len / max_size`.
    pub fn filling_level(&self) -> f64 {
        self.len() as f64 / self.max_size as f64
    }

    pub fn contains(&self, key: &K) -> bool {
        self.policy.contains(key)
    }

    /// Insert or refresh `key`, returning whatever had to be evicted.
    pub fn add(&mut self, key: K) -> Vec<K> {
        self.policy.touch(&key);
        self.cull()
    }

    /// Refresh `key` if cached. Returns whether it was.
    pub fn touch(&mut self, key: &K) -> bool {
        if self.policy.contains(key) {
            self.policy.touch(key);
            tracing::trace!(key = ?key, "Touched cache entry");
            true
        } else {
            false
        }
    }

    /// Remove `key`.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not cached; callers check membership first, so an
    /// absent key means the identity map is corrupt.
    pub fn remove(&mut self, key: &K) {
        assert!(
            self.policy.remove(key),
            "cache entry {:?} removed but not present",
            key
        );
    }

    /// Change the bound, evicting immediately when shrinking.
    pub fn set_max_size(&mut self, max_size: usize) -> Vec<K> {
        self.max_size = max_size.max(1);
        self.cull()
    }

    pub fn clear(&mut self) {
        self.policy.clear();
    }

    fn cull(&mut self) -> Vec<K> {
        let mut evicted = Vec::new();
        while self.policy.len() > self.max_size {
            let batch = self.policy.pop_least(self.cull_n);
            if batch.is_empty() {
                break;
            }
            evicted.extend(batch);
        }
        if !evicted.is_empty() {
            tracing::debug!(
                evicted = evicted.len(),
                len = self.policy.len(),
                max_size = self.max_size,
                "Culled entry cache"
            );
        }
        evicted
    }
}
