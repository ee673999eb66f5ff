use std::hash::Hash;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

use crate::entity::{Device, DeviceAssignment};

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Bounded key/value cache for hot entities.
///
/// The cache is an optimization, never a source of truth: `get` reports a
/// miss immediately (no fetch-through), a `put` into a full cache is dropped
/// silently, and an optional TTL bounds staleness when the owning
/// collaborator's invalidation is delayed. The read path is lock-free; a
/// race between `invalidate` and `get` may yield a stale hit, which is
/// acceptable until the next invalidation.
pub struct EntityCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    capacity: usize,
    ttl: Option<Duration>,
}

impl<K, V> EntityCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => match self.ttl {
                Some(ttl) if entry.inserted_at.elapsed() > ttl => true,
                _ => return Some(entry.value.clone()),
            },
            None => return None,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn put(&self, key: K, value: V) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            return;
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The two hot-entity caches consulted on every ingested event. One instance
/// per tenant channel; never shared across tenants.
///
/// Devices are keyed by hardware token, assignments by assignment id. The
/// caches are passive: population happens lazily on miss and invalidation is
/// triggered by whichever collaborator owns the mutation.
pub struct DeviceManagementCache {
    devices: EntityCache<String, Device>,
    assignments: EntityCache<Uuid, DeviceAssignment>,
}

impl DeviceManagementCache {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            devices: EntityCache::new(capacity, ttl),
            assignments: EntityCache::new(capacity, ttl),
        }
    }

    pub fn devices(&self) -> &EntityCache<String, Device> {
        &self.devices
    }

    pub fn assignments(&self) -> &EntityCache<Uuid, DeviceAssignment> {
        &self.assignments
    }

    pub fn clear(&self) {
        self.devices.clear();
        self.assignments.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_after_put_hits() {
        let cache: EntityCache<String, u32> = EntityCache::new(8, None);
        cache.put("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
    }

    #[test]
    fn test_invalidate_forces_next_get_to_miss() {
        let cache: EntityCache<String, u32> = EntityCache::new(8, None);
        cache.put("a".to_string(), 1);
        cache.invalidate(&"a".to_string());
        assert_eq!(cache.get(&"a".to_string()), None);
    }

    #[test]
    fn test_put_into_full_cache_is_dropped() {
        let cache: EntityCache<String, u32> = EntityCache::new(2, None);
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);
        cache.put("c".to_string(), 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"c".to_string()), None);
        // Re-putting an existing key is always accepted.
        cache.put("a".to_string(), 10);
        assert_eq!(cache.get(&"a".to_string()), Some(10));
    }

    #[test]
    fn test_ttl_expires_entries() {
        let cache: EntityCache<String, u32> =
            EntityCache::new(8, Some(Duration::from_millis(10)));
        cache.put("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(cache.get(&"a".to_string()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_empties_both_entity_caches() {
        let cache = DeviceManagementCache::new(8, None);
        cache.devices().put(
            "hw-1".to_string(),
            Device {
                id: Uuid::new_v4(),
                token: "hw-1".to_string(),
                area_id: None,
                created_at: None,
                updated_at: None,
            },
        );
        cache.clear();
        assert!(cache.devices().is_empty());
        assert!(cache.assignments().is_empty());
    }
}
