use super::EvictionPolicy;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;

/// Strict most-recently-used ordering.
///
/// Each touch stamps the key with a fresh tick; the tick index is ordered,
/// so touch and remove are O(log n) and eviction takes from the oldest end.
#[derive(Debug)]
pub struct MruPolicy<K> {
    tick: u64,
    stamps: HashMap<K, u64>,
    order: BTreeMap<u64, K>,
}

impl<K> Default for MruPolicy<K> {
    fn default() -> Self {
        Self {
            tick: 0,
            stamps: HashMap::new(),
            order: BTreeMap::new(),
        }
    }
}

impl<K> MruPolicy<K> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K: Clone + Eq + Hash + Debug> EvictionPolicy<K> for MruPolicy<K> {
    fn touch(&mut self, key: &K) {
        self.tick += 1;
        if let Some(old) = self.stamps.insert(key.clone(), self.tick) {
            self.order.remove(&old);
        }
        self.order.insert(self.tick, key.clone());
    }

    fn remove(&mut self, key: &K) -> bool {
        match self.stamps.remove(key) {
            Some(stamp) => {
                self.order.remove(&stamp);
                true
            }
            None => false,
        }
    }

    fn contains(&self, key: &K) -> bool {
        self.stamps.contains_key(key)
    }

    fn len(&self) -> usize {
        self.stamps.len()
    }

    fn pop_least(&mut self, n: usize) -> Vec<K> {
        let mut out = Vec::with_capacity(n.min(self.order.len()));
        while out.len() < n {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            self.stamps.remove(&key);
            out.push(key);
        }
        out
    }

    fn clear(&mut self) {
        self.stamps.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order() {
        let mut p = MruPolicy::new();
        for k in ["a", "b", "c"] {
            p.touch(&k);
        }
        p.touch(&"a");
        assert_eq!(p.pop_least(2), vec!["b", "c"]);
        assert_eq!(p.len(), 1);
        assert!(p.remove(&"a"));
        assert!(!p.remove(&"a"));
    }
}
