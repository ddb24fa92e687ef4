use super::EvictionPolicy;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

#[derive(Debug, Clone, Copy)]
struct Stamp {
    tick: u64,
    hits: u64,
}

/// Timestamp ordering with access counts.
///
/// Entries compare by timestamp only; the access count is bookkeeping.
/// Eviction sorts every entry, so this is meant for small caches.
#[derive(Debug)]
pub struct TimestampPolicy<K> {
    tick: u64,
    entries: HashMap<K, Stamp>,
}

impl<K> Default for TimestampPolicy<K> {
    fn default() -> Self {
        Self {
            tick: 0,
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> TimestampPolicy<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of touches `key` received since insertion.
    pub fn hits(&self, key: &K) -> Option<u64> {
        self.entries.get(key).map(|s| s.hits)
    }
}

impl<K: Clone + Eq + Hash + Debug> EvictionPolicy<K> for TimestampPolicy<K> {
    fn touch(&mut self, key: &K) {
        self.tick += 1;
        let tick = self.tick;
        self.entries
            .entry(key.clone())
            .and_modify(|s| {
                s.tick = tick;
                s.hits += 1;
            })
            .or_insert(Stamp { tick, hits: 1 });
    }

    fn remove(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn pop_least(&mut self, n: usize) -> Vec<K> {
        let mut sorted: Vec<(u64, K)> = self
            .entries
            .iter()
            .map(|(k, s)| (s.tick, k.clone()))
            .collect();
        sorted.sort_unstable_by_key(|(tick, _)| *tick);
        sorted.truncate(n);
        for (_, key) in &sorted {
            self.entries.remove(key);
        }
        sorted.into_iter().map(|(_, k)| k).collect()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}
