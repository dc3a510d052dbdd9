//! Capacity-bounded cache with cost accounting.
//!
//! # Responsibilities
//! - Serve lookups without blocking on admission or eviction
//! - Admit entries against a fixed cost budget (`max_cost`)
//! - Evict low-frequency, least recently touched entries to make room
//! - Emit one counter event per hit, miss, add, update and eviction
//!
//! # Design Decisions
//! - Entries live in a sharded `DashMap`; lookups only touch one shard
//! - Admission state (which keys exist, their cost, the used budget) sits behind
//!   a single policy mutex, so concurrent sets on one key are serialized
//! - Victims are picked from a small random sample, bounding eviction work
//! - An entry whose cost alone exceeds `max_cost` is refused and not counted as added

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::cache::sketch::FrequencySketch;
use crate::cache::stats::{CacheEvent, CounterSet};
use crate::cache::CacheKind;

/// Number of entries sampled when looking for an eviction victim.
const EVICTION_SAMPLE: usize = 5;

/// Sketch counters allocated per unit of capacity.
const COUNTERS_PER_COST: usize = 10;

struct StoredEntry<V> {
    value: V,
    last_touched: AtomicU64,
}

struct Slot<K> {
    key: K,
    key_hash: u64,
    cost: i64,
}

/// Admission bookkeeping. Only touched under the policy mutex.
struct Policy<K> {
    index: HashMap<K, usize>,
    slots: Vec<Slot<K>>,
    used: i64,
}

impl<K: Hash + Eq + Clone> Policy<K> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            used: 0,
        }
    }

    fn push(&mut self, slot: Slot<K>) {
        self.used += slot.cost;
        self.index.insert(slot.key.clone(), self.slots.len());
        self.slots.push(slot);
    }

    fn remove_at(&mut self, idx: usize) -> Slot<K> {
        let slot = self.slots.swap_remove(idx);
        self.index.remove(&slot.key);
        if let Some(moved) = self.slots.get(idx) {
            self.index.insert(moved.key.clone(), idx);
        }
        self.used -= slot.cost;
        slot
    }
}

/// A single-kind cache bounded by total cost.
pub struct CostAwareCache<K, V> {
    kind: CacheKind,
    max_cost: i64,
    store: DashMap<K, StoredEntry<V>>,
    policy: Mutex<Policy<K>>,
    sketch: FrequencySketch,
    clock: AtomicU64,
    counters: Arc<CounterSet>,
}

impl<K, V> CostAwareCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache with a fixed capacity, reporting into `counters`.
    pub fn new(kind: CacheKind, max_cost: i64, counters: Arc<CounterSet>) -> Self {
        let capacity = usize::try_from(max_cost.max(1)).unwrap_or(usize::MAX);
        Self {
            kind,
            max_cost,
            store: DashMap::new(),
            policy: Mutex::new(Policy::new()),
            sketch: FrequencySketch::new(capacity.saturating_mul(COUNTERS_PER_COST)),
            clock: AtomicU64::new(0),
            counters,
        }
    }

    /// Look up a key. Counts a hit or a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        self.sketch.increment(self.sketch.hash(key));

        match self.store.get(key) {
            Some(entry) => {
                entry.last_touched.store(self.tick(), Ordering::Relaxed);
                self.counters.record(CacheEvent::Hit);
                Some(entry.value.clone())
            }
            None => {
                self.counters.record(CacheEvent::Miss);
                None
            }
        }
    }

    /// Insert or replace an entry. Returns `false` when the entry was refused.
    ///
    /// A cost below 1 is treated as the base cost of 1.
    pub fn set(&self, key: K, value: V, cost: i64) -> bool {
        let cost = cost.max(1);
        if cost > self.max_cost {
            self.counters.record(CacheEvent::Rejected);
            tracing::debug!(
                cache = %self.kind,
                cost,
                max_cost = self.max_cost,
                "Entry exceeds cache capacity, not admitted"
            );
            return false;
        }

        let key_hash = self.sketch.hash(&key);
        let mut policy = self.policy.lock();

        if let Some(&idx) = policy.index.get(&key) {
            let delta = cost - policy.slots[idx].cost;
            if delta > 0 {
                self.make_room(&mut policy, delta, Some(&key));
            }
            // eviction may have moved the slot
            if let Some(&idx) = policy.index.get(&key) {
                policy.slots[idx].cost = cost;
                policy.used += delta;
            }
            self.store.insert(key, self.entry(value));
            self.counters.record(CacheEvent::Updated(delta));
            return true;
        }

        self.make_room(&mut policy, cost, None);
        policy.push(Slot {
            key: key.clone(),
            key_hash,
            cost,
        });
        self.store.insert(key, self.entry(value));
        self.counters.record(CacheEvent::Added(cost));
        true
    }

    /// Evict until `needed` more cost fits in the budget.
    fn make_room(&self, policy: &mut Policy<K>, needed: i64, protect: Option<&K>) {
        while policy.used + needed > self.max_cost {
            let Some(victim) = self.pick_victim(policy, protect) else {
                break;
            };
            let slot = policy.remove_at(victim);
            self.store.remove(&slot.key);
            self.counters.record(CacheEvent::Evicted(slot.cost));
            tracing::trace!(cache = %self.kind, cost = slot.cost, "Evicted entry");
        }
    }

    /// Lowest frequency wins; ties go to the entry touched longest ago.
    fn pick_victim(&self, policy: &Policy<K>, protect: Option<&K>) -> Option<usize> {
        let len = policy.slots.len();
        if len == 0 {
            return None;
        }

        let start = fastrand::usize(..len);
        let mut best: Option<(usize, (u8, u64))> = None;
        for offset in 0..EVICTION_SAMPLE.min(len) {
            let idx = (start + offset) % len;
            let slot = &policy.slots[idx];
            if protect == Some(&slot.key) {
                continue;
            }
            let touched = self
                .store
                .get(&slot.key)
                .map(|e| e.last_touched.load(Ordering::Relaxed))
                .unwrap_or(0);
            let score = (self.sketch.estimate(slot.key_hash), touched);
            if best.map_or(true, |(_, current)| score < current) {
                best = Some((idx, score));
            }
        }
        best.map(|(idx, _)| idx)
    }

    fn entry(&self, value: V) -> StoredEntry<V> {
        StoredEntry {
            value,
            last_touched: AtomicU64::new(self.tick()),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Whether the key is currently cached. Does not count as a lookup.
    pub fn contains(&self, key: &K) -> bool {
        self.store.contains_key(key)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Sum of the costs of all cached entries.
    pub fn used_cost(&self) -> i64 {
        self.policy.lock().used
    }

    /// Configured capacity. Fixed for the lifetime of the cache.
    pub fn max_cost(&self) -> i64 {
        self.max_cost
    }

    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    /// Counters this cache reports into.
    pub fn counters(&self) -> &Arc<CounterSet> {
        &self.counters
    }
}

impl<K: Hash + Eq, V> std::fmt::Debug for CostAwareCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostAwareCache")
            .field("kind", &self.kind)
            .field("max_cost", &self.max_cost)
            .field("entries", &self.store.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn cache(max_cost: i64) -> CostAwareCache<String, u32> {
        CostAwareCache::new(CacheKind::Validation, max_cost, Arc::new(CounterSet::new(max_cost)))
    }

    #[test]
    fn debug_shows_kind_and_entries() {
        let cache = cache(4);
        cache.set("a".to_string(), 1, 1);
        let rendered = format!("{cache:?}");
        assert!(rendered.contains("Validation"));
        assert!(rendered.contains("entries: 1"));
    }

    #[test]
    fn miss_then_hit() {
        let cache = cache(10);
        assert_eq!(cache.get(&"a".to_string()), None);
        assert!(cache.set("a".into(), 1, 1));
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        let values = cache.counters().values();
        assert_eq!(values.hits, 1);
        assert_eq!(values.misses, 1);
        assert_eq!(values.added, 1);
    }

    #[test]
    fn tight_capacity_evicts_exactly_one() {
        let cache = cache(1);
        assert!(cache.set("{employees{id}}".into(), 1, 1));
        assert!(cache.set("{employees{tag}}".into(), 2, 1));

        let values = cache.counters().values();
        assert_eq!(values.added, 2);
        assert_eq!(values.evicted, 1);
        assert_eq!(values.cost_evicted, 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.used_cost(), 1);
        assert!(cache.contains(&"{employees{tag}}".to_string()));
    }

    #[test]
    fn oversized_entry_is_rejected() {
        let cache = cache(1);
        assert!(!cache.set("big".into(), 1, 2));

        let values = cache.counters().values();
        assert_eq!(values.added, 0);
        assert_eq!(values.rejected, 1);
        assert!(cache.is_empty());
        // still a miss on every call
        assert_eq!(cache.get(&"big".to_string()), None);
        assert_eq!(cache.get(&"big".to_string()), None);
        assert_eq!(cache.counters().values().misses, 2);
    }

    #[test]
    fn update_records_cost_delta() {
        let cache = cache(10);
        cache.set("a".into(), 1, 4);
        cache.set("a".into(), 2, 1);

        let values = cache.counters().values();
        assert_eq!(values.added, 1);
        assert_eq!(values.updated, 1);
        assert_eq!(values.cost_updated, -3);
        assert_eq!(values.current_cost(), 1);
        assert_eq!(cache.used_cost(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(2));
    }

    #[test]
    fn growing_update_evicts_other_entries_only() {
        let cache = cache(3);
        cache.set("a".into(), 1, 1);
        cache.set("b".into(), 2, 1);
        cache.set("c".into(), 3, 1);

        assert!(cache.set("a".into(), 10, 3));
        assert!(cache.contains(&"a".to_string()));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.used_cost(), 3);
        assert_eq!(cache.counters().values().evicted, 2);
    }

    #[test]
    fn oversized_update_keeps_old_entry() {
        let cache = cache(2);
        cache.set("a".into(), 1, 1);
        assert!(!cache.set("a".into(), 2, 5));
        assert_eq!(cache.get(&"a".to_string()), Some(1));
    }

    #[test]
    fn prefers_evicting_cold_entries() {
        let cache = cache(2);
        cache.set("hot".into(), 1, 1);
        cache.set("cold".into(), 2, 1);
        for _ in 0..10 {
            cache.get(&"hot".to_string());
        }

        cache.set("new".into(), 3, 1);
        assert!(cache.contains(&"hot".to_string()));
        assert!(!cache.contains(&"cold".to_string()));
    }

    #[test]
    fn cost_never_exceeds_capacity() {
        let cache = cache(50);
        for i in 0..500 {
            cache.set(format!("key-{i}"), i, (i % 7) as i64 + 1);
            assert!(cache.used_cost() <= 50);
        }
        let values = cache.counters().values();
        assert_eq!(values.current_cost(), cache.used_cost());
        assert_eq!(values.current_entries() as usize, cache.len());
    }

    #[test]
    fn concurrent_sets_on_same_key() {
        let cache = Arc::new(cache(100));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        cache.set("shared".into(), t, 1);
                        cache.get(&"shared".to_string());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let values = cache.counters().values();
        assert_eq!(values.added, 1);
        assert_eq!(values.updated, 799);
        assert_eq!(values.hits, 800);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.used_cost(), 1);
    }
}
