//! Identity map.
//!
//! [`Storage`] owns every instance of a context in an [`Arena`] and tracks
//! three memberships:
//!
//! - `alive`: (model, primary key) to instance, at most one per key. Unsaved
//!   instances without a key use a pending placeholder.
//! - `dirty`: instances with unsaved state, in first-dirtied order.
//! - the [`EntryCache`]: saved instances, bounded.
//!
//! Eviction only drops the cache entry: the instance keeps its slot and its
//! identity, so handles stay valid. Evicted instances that are neither dirty
//! nor pinned are flagged; the next row that materializes them overwrites
//! their values and marks them reloaded. Slots are freed by `release` and
//! `release_evicted` only.

use crate::arena::{Arena, InstanceId};
use crate::cache::EntryCache;
use crate::hooks::ModelEvent;
use crate::info::InstanceInfo;
use heinzel_core::{Config, Error, Result, UsageErrorKind, Value};
use std::collections::{HashMap, HashSet};

/// Hashable form of a primary-key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PkKey {
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    /// Placeholder for an instance without a primary key yet
    Pending(u64),
}

impl PkKey {
    /// Key for a non-NULL value.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(PkKey::Int(i64::from(*b))),
            Value::Int(v) => Some(PkKey::Int(i64::from(*v))),
            Value::BigInt(v) => Some(PkKey::Int(*v)),
            Value::Double(v) => Some(PkKey::Text(v.to_string())),
            Value::Text(s) => Some(PkKey::Text(s.clone())),
            Value::Bytes(b) => Some(PkKey::Bytes(b.clone())),
        }
    }
}

type AliveKey = (String, PkKey);

#[derive(Debug)]
pub struct Storage {
    instances: Arena<InstanceInfo>,
    alive: HashMap<AliveKey, InstanceId>,
    dirty: Vec<InstanceId>,
    cache: EntryCache<InstanceId>,
    evicted: HashSet<InstanceId>,
    pins: HashMap<InstanceId, usize>,
    next_pending: u64,
}

impl Storage {
    pub fn new(config: &Config) -> Self {
        Self {
            instances: Arena::new(),
            alive: HashMap::new(),
            dirty: Vec::new(),
            cache: EntryCache::from_config(config),
            evicted: HashSet::new(),
            pins: HashMap::new(),
            next_pending: 0,
        }
    }

    /// Add an instance to the arena. It is not alive until `PostInit`.
    pub fn insert(&mut self, info: InstanceInfo) -> InstanceId {
        self.instances.insert(info)
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.instances.contains(id)
    }

    pub fn get(&self, id: InstanceId) -> Result<&InstanceInfo> {
        self.instances.get(id).ok_or_else(|| stale(id))
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Result<&mut InstanceInfo> {
        self.instances.get_mut(id).ok_or_else(|| stale(id))
    }

    /// Number of instances held, cached or not.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Live instance for `pk` of `model`.
    pub fn lookup(&self, model: &str, pk: &Value) -> Option<InstanceId> {
        let key = PkKey::from_value(pk)?;
        self.alive.get(&(model.to_string(), key)).copied()
    }

    /// Instances of `model` currently held.
    pub fn instances_of(&self, model: &str) -> Vec<InstanceId> {
        self.instances
            .iter()
            .filter(|(_, info)| info.model == model)
            .map(|(id, _)| id)
            .collect()
    }

    fn real_key(info: &InstanceInfo) -> Option<AliveKey> {
        PkKey::from_value(&info.pk()).map(|k| (info.model.clone(), k))
    }

    fn pending_key(info: &InstanceInfo) -> Option<AliveKey> {
        info.pending.map(|p| (info.model.clone(), PkKey::Pending(p)))
    }

    pub fn is_alive(&self, id: InstanceId) -> bool {
        let Ok(info) = self.get(id) else {
            return false;
        };
        [Self::real_key(info), Self::pending_key(info)]
            .into_iter()
            .flatten()
            .any(|key| self.alive.get(&key) == Some(&id))
    }

    pub fn is_cached(&self, id: InstanceId) -> bool {
        self.cache.contains(&id)
    }

    pub fn is_dirty(&self, id: InstanceId) -> bool {
        self.dirty.contains(&id)
    }

    pub fn is_pinned(&self, id: InstanceId) -> bool {
        self.pins.contains_key(&id)
    }

    /// Dirty instances in first-dirtied order.
    pub fn dirty(&self) -> Vec<InstanceId> {
        self.dirty.clone()
    }

    pub fn set_dirty(&mut self, id: InstanceId) {
        if !self.dirty.contains(&id) {
            self.dirty.push(id);
        }
    }

    pub fn clear_dirty(&mut self, id: InstanceId) {
        self.dirty.retain(|d| *d != id);
    }

    /// Dropped from the cache while clean and unpinned?
    pub fn is_evicted(&self, id: InstanceId) -> bool {
        self.evicted.contains(&id)
    }

    /// Clear the eviction flag, returning whether it was set.
    pub fn take_evicted(&mut self, id: InstanceId) -> bool {
        self.evicted.remove(&id)
    }

    /// Put `id` into `alive` under its primary key, or a placeholder.
    fn register(&mut self, id: InstanceId) -> Result<()> {
        let next = self.next_pending;
        let info = self.get_mut(id)?;
        let key = match Self::real_key(info) {
            Some(key) => key,
            None => {
                let pending = *info.pending.get_or_insert(next);
                (info.model.clone(), PkKey::Pending(pending))
            }
        };
        if matches!(key.1, PkKey::Pending(p) if p == next) {
            self.next_pending += 1;
        }
        self.alive.insert(key, id);
        Ok(())
    }

    /// Move `id` from its placeholder to its real key and cache it.
    pub fn cache(&mut self, id: InstanceId) -> Result<()> {
        let info = self.get_mut(id)?;
        let pending = Self::pending_key(info);
        let real = Self::real_key(info);
        if real.is_some() {
            info.pending = None;
        }
        if let (Some(pending), Some(_)) = (&pending, &real) {
            if self.alive.get(pending) == Some(&id) {
                self.alive.remove(pending);
            }
        }
        match real {
            Some(key) => {
                self.alive.insert(key, id);
            }
            None => self.register(id)?,
        }
        self.evicted.remove(&id);

        // A batch larger than the cache may take `id` itself; it stays alive.
        for evicted in self.cache.add(id) {
            if evicted != id {
                self.evicted(evicted);
            }
        }
        Ok(())
    }

    /// Refresh `id` in the cache if it is cached.
    pub fn touch(&mut self, id: InstanceId) {
        self.cache.touch(&id);
    }

    /// Drop `id` from the cache, `dirty` and `alive`. The slot is kept.
    pub fn uncache(&mut self, id: InstanceId) -> Result<()> {
        let info = self.get(id)?;
        let keys: Vec<AliveKey> = [Self::real_key(info), Self::pending_key(info)]
            .into_iter()
            .flatten()
            .collect();
        for key in keys {
            if self.alive.get(&key) == Some(&id) {
                self.alive.remove(&key);
            }
        }
        if self.cache.contains(&id) {
            self.cache.remove(&id);
        }
        self.clear_dirty(id);
        self.evicted.remove(&id);
        Ok(())
    }

    /// Move the alive entry of `id` from `old_pk` to its current primary key.
    pub fn rekey(&mut self, id: InstanceId, old_pk: &Value) -> Result<()> {
        let info = self.get(id)?;
        let model = info.model.clone();
        if let Some(key) = Self::real_key(info) {
            if self.alive.get(&key).is_some_and(|other| *other != id) {
                return Err(duplicate(&model, &info.pk()));
            }
        }
        let old_keys = [
            PkKey::from_value(old_pk).map(|k| (model, k)),
            Self::pending_key(info),
        ];

        let mut was_alive = false;
        for key in old_keys.into_iter().flatten() {
            if self.alive.get(&key) == Some(&id) {
                self.alive.remove(&key);
                was_alive = true;
            }
        }
        self.get_mut(id)?.pending = None;
        if was_alive {
            self.register(id)?;
        }
        Ok(())
    }

    /// Fail if another live instance already holds `pk`.
    pub fn check_identity(&self, model: &str, pk: &Value) -> Result<()> {
        if self.lookup(model, pk).is_some() {
            return Err(duplicate(model, pk));
        }
        Ok(())
    }

    pub fn pin(&mut self, id: InstanceId) -> Result<()> {
        self.get(id)?;
        *self.pins.entry(id).or_insert(0) += 1;
        Ok(())
    }

    /// Undo one `pin`. An unpinned instance that is neither cached nor dirty
    /// counts as evicted.
    pub fn unpin(&mut self, id: InstanceId) -> Result<()> {
        self.get(id)?;
        if let Some(count) = self.pins.get_mut(&id) {
            *count -= 1;
            if *count == 0 {
                self.pins.remove(&id);
                let info = self.get(id)?;
                if info.meta.do_cache && !self.is_cached(id) && !self.is_dirty(id) {
                    self.evicted.insert(id);
                }
            }
        }
        Ok(())
    }

    fn evicted(&mut self, id: InstanceId) {
        if self.is_dirty(id) || self.is_pinned(id) {
            tracing::trace!(instance = %id, "Evicted instance kept current");
            return;
        }
        if self.contains(id) {
            self.evicted.insert(id);
        }
    }

    /// Free the slot of `id` and forget it everywhere.
    pub fn release(&mut self, id: InstanceId) -> Result<()> {
        let info = self.get(id)?;
        let keys = [Self::real_key(info), Self::pending_key(info)];
        for key in keys.into_iter().flatten() {
            if self.alive.get(&key) == Some(&id) {
                self.alive.remove(&key);
            }
        }
        if self.cache.contains(&id) {
            self.cache.remove(&id);
        }
        self.clear_dirty(id);
        self.pins.remove(&id);
        self.evicted.remove(&id);
        self.instances.remove(id);
        tracing::trace!(instance = %id, "Released instance");
        Ok(())
    }

    /// Free every evicted instance that is still clean and unpinned.
    /// Returns how many slots were freed.
    pub fn release_evicted(&mut self) -> usize {
        let doomed: Vec<InstanceId> = self
            .evicted
            .iter()
            .copied()
            .filter(|id| !self.is_dirty(*id) && !self.is_pinned(*id))
            .collect();
        let mut freed = 0;
        for id in doomed {
            if self.release(id).is_ok() {
                freed += 1;
            }
        }
        if freed > 0 {
            tracing::debug!(freed, "Released evicted instances");
        }
        freed
    }

    /// Apply the identity-map reaction to a lifecycle event.
    pub fn handle(&mut self, id: InstanceId, event: &ModelEvent) -> Result<()> {
        match event {
            ModelEvent::PreInit => {}
            ModelEvent::PostInit => {
                self.get_mut(id)?.meta.track_changes = true;
                self.register(id)?;
                if !self.get(id)?.is_saved() {
                    self.set_dirty(id);
                }
            }
            ModelEvent::PreSave => {}
            ModelEvent::PostSave { .. } => {
                if self.get(id)?.meta.do_cache {
                    self.cache(id)?;
                }
                self.clear_dirty(id);
                self.get_mut(id)?.meta.track_changes = true;
            }
            ModelEvent::PreUpdate { .. } => {}
            ModelEvent::PostUpdate { .. } => {
                if !self.is_dirty(id) && self.get(id)?.meta.track_changes {
                    self.set_dirty(id);
                }
            }
            ModelEvent::PreDelete => {
                self.get_mut(id)?.meta.track_changes = false;
            }
            ModelEvent::PostDelete { deleted } => {
                if *deleted {
                    self.uncache(id)?;
                    self.clear_dirty(id);
                    let info = self.get_mut(id)?;
                    let pk_column = info.pk_column.clone();
                    info.values.insert(pk_column, Value::Null);
                    info.values.insert("id".to_string(), Value::Null);
                    info.pending = None;
                }
            }
            ModelEvent::DoCache => {
                self.cache(id)?;
                self.set_dirty(id);
                let meta = &mut self.get_mut(id)?.meta;
                meta.do_cache = true;
                meta.track_changes = true;
            }
            ModelEvent::DoNotCache => {
                self.uncache(id)?;
                let meta = &mut self.get_mut(id)?.meta;
                meta.do_cache = false;
                meta.track_changes = false;
            }
        }
        Ok(())
    }

    /// Change the cache bound, evicting immediately when shrinking.
    pub fn set_max_cache(&mut self, max: usize) {
        for evicted in self.cache.set_max_size(max) {
            self.evicted(evicted);
        }
    }
}

fn stale(id: InstanceId) -> Error {
    Error::usage(
        UsageErrorKind::StaleInstance,
        format!("instance {} is no longer held by this context", id),
    )
}

fn duplicate(model: &str, pk: &Value) -> Error {
    Error::usage(
        UsageErrorKind::DuplicateIdentity,
        format!("another live {} already has primary key {}", model, pk),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use heinzel_core::{FieldInfo, ModelSchema};

    fn schema() -> ModelSchema {
        ModelSchema::builder("Car")
            .field(FieldInfo::text("name"))
            .build()
            .unwrap()
    }

    fn saved(storage: &mut Storage, schema: &ModelSchema, pk: i64) -> InstanceId {
        let mut info = InstanceInfo::new(schema, true);
        info.values.insert("id".into(), Value::BigInt(pk));
        let id = storage.insert(info);
        storage.handle(id, &ModelEvent::PreInit).unwrap();
        storage.handle(id, &ModelEvent::PostInit).unwrap();
        storage.cache(id).unwrap();
        id
    }

    #[test]
    fn test_unsaved_instance_is_dirty_under_placeholder() {
        let schema = schema();
        let mut storage = Storage::new(&Config::default());
        let id = storage.insert(InstanceInfo::new(&schema, true));
        storage.handle(id, &ModelEvent::PostInit).unwrap();
        assert!(storage.is_dirty(id));
        assert!(storage.is_alive(id));
        assert!(!storage.is_cached(id));

        storage.get_mut(id).unwrap().values.insert("id".into(), Value::BigInt(7));
        storage.handle(id, &ModelEvent::PostSave { created: true }).unwrap();
        assert!(!storage.is_dirty(id));
        assert!(storage.is_cached(id));
        assert_eq!(storage.lookup("Car", &Value::Int(7)), Some(id));
        assert_eq!(storage.get(id).unwrap().pending, None);
    }

    #[test]
    fn test_eviction_keeps_slot_and_flags_instance() {
        let schema = schema();
        let mut storage = Storage::new(&Config::default().max_cache(2));
        let a = saved(&mut storage, &schema, 1);
        let b = saved(&mut storage, &schema, 2);
        storage.pin(b).unwrap();
        let _c = saved(&mut storage, &schema, 3);
        assert!(storage.get(a).is_ok());
        assert!(!storage.is_cached(a));
        assert_eq!(storage.lookup("Car", &Value::BigInt(1)), Some(a));
        assert!(storage.is_evicted(a));
        assert!(storage.take_evicted(a));
        assert!(!storage.take_evicted(a));

        // b is pinned, so evicting it does not flag it.
        let _d = saved(&mut storage, &schema, 4);
        assert!(storage.is_alive(b));
        assert!(!storage.is_cached(b));
        assert!(!storage.is_evicted(b));
        storage.unpin(b).unwrap();
        assert!(storage.is_alive(b));
        assert!(storage.is_evicted(b));

        storage.cache(b).unwrap();
        assert!(!storage.is_evicted(b));
    }

    #[test]
    fn test_release_evicted_frees_clean_slots() {
        let schema = schema();
        let mut storage = Storage::new(&Config::default().max_cache(1));
        let a = saved(&mut storage, &schema, 1);
        let b = saved(&mut storage, &schema, 2);
        storage.handle(b, &ModelEvent::PostUpdate { field: "name".into() }).unwrap();
        let c = saved(&mut storage, &schema, 3);
        assert!(storage.is_evicted(a));
        assert!(!storage.is_evicted(b));

        assert_eq!(storage.release_evicted(), 1);
        assert!(storage.get(a).is_err());
        assert_eq!(storage.lookup("Car", &Value::BigInt(1)), None);
        assert!(storage.is_alive(b));
        assert!(storage.is_cached(c));
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn test_release_forgets_instance_everywhere() {
        let schema = schema();
        let mut storage = Storage::new(&Config::default());
        let a = saved(&mut storage, &schema, 1);
        storage.pin(a).unwrap();
        storage.handle(a, &ModelEvent::PostUpdate { field: "name".into() }).unwrap();

        storage.release(a).unwrap();
        assert!(storage.get(a).is_err());
        assert!(!storage.is_alive(a));
        assert!(!storage.is_cached(a));
        assert!(!storage.is_dirty(a));
        assert!(!storage.is_pinned(a));
        assert_eq!(storage.lookup("Car", &Value::BigInt(1)), None);
        assert!(storage.release(a).is_err());
    }

    #[test]
    fn test_dirty_instance_survives_eviction() {
        let schema = schema();
        let mut storage = Storage::new(&Config::default().max_cache(1));
        let a = saved(&mut storage, &schema, 1);
        storage.handle(a, &ModelEvent::PostUpdate { field: "name".into() }).unwrap();
        let _b = saved(&mut storage, &schema, 2);
        assert!(storage.is_dirty(a));
        assert!(storage.is_alive(a));
    }

    #[test]
    fn test_do_not_cache() {
        let schema = schema();
        let mut storage = Storage::new(&Config::default());
        let a = saved(&mut storage, &schema, 1);
        storage.handle(a, &ModelEvent::DoNotCache).unwrap();
        assert!(!storage.is_alive(a));
        assert!(!storage.is_cached(a));
        storage.handle(a, &ModelEvent::PostSave { created: false }).unwrap();
        assert!(!storage.is_cached(a));
        assert_eq!(storage.lookup("Car", &Value::BigInt(1)), None);

        storage.handle(a, &ModelEvent::DoCache).unwrap();
        assert!(storage.is_cached(a));
        assert!(storage.is_dirty(a));
    }

    #[test]
    fn test_post_delete_forgets_key() {
        let schema = schema();
        let mut storage = Storage::new(&Config::default());
        let a = saved(&mut storage, &schema, 5);
        storage.handle(a, &ModelEvent::PreDelete).unwrap();
        storage.handle(a, &ModelEvent::PostDelete { deleted: true }).unwrap();
        assert_eq!(storage.lookup("Car", &Value::BigInt(5)), None);
        assert!(!storage.is_cached(a));
        assert!(!storage.is_dirty(a));
        assert!(storage.get(a).unwrap().pk().is_null());
        assert!(!storage.is_evicted(a));
    }

    #[test]
    fn test_duplicate_identity() {
        let schema = schema();
        let mut storage = Storage::new(&Config::default());
        saved(&mut storage, &schema, 1);
        let err = storage.check_identity("Car", &Value::BigInt(1)).unwrap_err();
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::DuplicateIdentity));
    }
}
