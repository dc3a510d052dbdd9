//! Cache statistics aggregation.
//!
//! # Responsibilities
//! - Hold one `CounterSet` per (cache kind, namespace)
//! - Accept events from caches and from callers holding only a kind/namespace
//! - Render counter points for the telemetry emitter
//!
//! # Design Decisions
//! - Each counter is an independent atomic; a snapshot is not atomic across counters
//! - Caches hold their `Arc<CounterSet>` directly so the hot path skips the map lookup

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::cache::{CacheKind, NamespaceId};

/// A single observable cache event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    /// Lookup found an entry.
    Hit,
    /// Lookup found nothing.
    Miss,
    /// A new entry was admitted with the given cost.
    Added(i64),
    /// An existing entry was replaced; the payload is new cost minus old cost.
    Updated(i64),
    /// An entry was evicted to make room; the payload is its cost.
    Evicted(i64),
    /// An entry was refused because its cost exceeds the capacity.
    Rejected,
}

/// Monotonic counters of one cache instance.
#[derive(Debug, Default)]
pub struct CounterSet {
    hits: AtomicU64,
    misses: AtomicU64,
    added: AtomicU64,
    updated: AtomicU64,
    evicted: AtomicU64,
    rejected: AtomicU64,
    cost_added: AtomicI64,
    cost_evicted: AtomicI64,
    cost_updated: AtomicI64,
    max_cost: i64,
}

/// Point-in-time copy of a `CounterSet`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterValues {
    pub hits: u64,
    pub misses: u64,
    pub added: u64,
    pub updated: u64,
    pub evicted: u64,
    pub rejected: u64,
    pub cost_added: i64,
    pub cost_evicted: i64,
    pub cost_updated: i64,
    pub max_cost: i64,
}

impl CounterValues {
    /// Cost currently held by the cache according to the counters.
    pub fn current_cost(&self) -> i64 {
        self.cost_added + self.cost_updated - self.cost_evicted
    }

    /// Entries currently held by the cache according to the counters.
    pub fn current_entries(&self) -> u64 {
        self.added.saturating_sub(self.evicted)
    }
}

impl CounterSet {
    /// Create counters for a cache with the given capacity.
    pub fn new(max_cost: i64) -> Self {
        Self {
            max_cost,
            ..Self::default()
        }
    }

    /// Apply one event.
    pub fn record(&self, event: CacheEvent) {
        match event {
            CacheEvent::Hit => {
                self.hits.fetch_add(1, Ordering::Relaxed);
            }
            CacheEvent::Miss => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
            CacheEvent::Added(cost) => {
                self.added.fetch_add(1, Ordering::Relaxed);
                self.cost_added.fetch_add(cost, Ordering::Relaxed);
            }
            CacheEvent::Updated(delta) => {
                self.updated.fetch_add(1, Ordering::Relaxed);
                self.cost_updated.fetch_add(delta, Ordering::Relaxed);
            }
            CacheEvent::Evicted(cost) => {
                self.evicted.fetch_add(1, Ordering::Relaxed);
                self.cost_evicted.fetch_add(cost, Ordering::Relaxed);
            }
            CacheEvent::Rejected => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Configured capacity.
    pub fn max_cost(&self) -> i64 {
        self.max_cost
    }

    /// Read all counters.
    pub fn values(&self) -> CounterValues {
        CounterValues {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            added: self.added.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            cost_added: self.cost_added.load(Ordering::Relaxed),
            cost_evicted: self.cost_evicted.load(Ordering::Relaxed),
            cost_updated: self.cost_updated.load(Ordering::Relaxed),
            max_cost: self.max_cost,
        }
    }
}

/// Which counter a rendered point carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterDimension {
    Hits,
    Misses,
    KeysAdded,
    KeysUpdated,
    KeysEvicted,
    CostAdded,
    CostEvicted,
    MaxCost,
}

impl CounterDimension {
    /// Label value used on the exported data point.
    pub fn label(&self) -> &'static str {
        match self {
            CounterDimension::Hits => "hits",
            CounterDimension::Misses => "misses",
            CounterDimension::KeysAdded | CounterDimension::CostAdded => "added",
            CounterDimension::KeysUpdated => "updated",
            CounterDimension::KeysEvicted | CounterDimension::CostEvicted => "evicted",
            CounterDimension::MaxCost => "max",
        }
    }
}

/// One rendered counter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterPoint {
    pub kind: CacheKind,
    pub namespace: NamespaceId,
    pub dimension: CounterDimension,
    pub value: i64,
}

/// Aggregates counters for every (cache kind, namespace).
#[derive(Debug, Default)]
pub struct CacheStatsRecorder {
    series: DashMap<(CacheKind, NamespaceId), Arc<CounterSet>>,
}

impl CacheStatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or fetch) the counters of a cache instance.
    pub fn register(
        &self,
        kind: CacheKind,
        namespace: &NamespaceId,
        max_cost: i64,
    ) -> Arc<CounterSet> {
        self.series
            .entry((kind, namespace.clone()))
            .or_insert_with(|| Arc::new(CounterSet::new(max_cost)))
            .clone()
    }

    /// Record an event for a registered cache.
    pub fn observe(&self, kind: CacheKind, namespace: &NamespaceId, event: CacheEvent) {
        match self.series.get(&(kind, namespace.clone())) {
            Some(counters) => counters.record(event),
            None => tracing::trace!(
                cache = %kind,
                namespace = %namespace,
                ?event,
                "Event for unregistered cache"
            ),
        }
    }

    /// Counters of one cache, if registered.
    pub fn counters(&self, kind: CacheKind, namespace: &NamespaceId) -> Option<Arc<CounterSet>> {
        self.series.get(&(kind, namespace.clone())).map(|r| r.value().clone())
    }

    /// Drop all series of a router config version.
    pub fn forget_config_version(&self, config_version: &str) -> usize {
        let before = self.series.len();
        self.series.retain(|(_, namespace), _| namespace.config_version() != config_version);
        before - self.series.len()
    }

    /// Render one point per counter dimension plus the capacity gauge.
    pub fn snapshot(&self) -> Vec<CounterPoint> {
        let mut series: Vec<_> = self
            .series
            .iter()
            .map(|r| (r.key().clone(), r.value().values()))
            .collect();
        series.sort_by(|(a, _), (b, _)| (&a.1, a.0).cmp(&(&b.1, b.0)));

        let mut points = Vec::with_capacity(series.len() * 8);
        for ((kind, namespace), values) in series {
            let dimensions = [
                (CounterDimension::Hits, values.hits as i64),
                (CounterDimension::Misses, values.misses as i64),
                (CounterDimension::KeysAdded, values.added as i64),
                (CounterDimension::KeysUpdated, values.updated as i64),
                (CounterDimension::KeysEvicted, values.evicted as i64),
                (CounterDimension::CostAdded, values.cost_added),
                (CounterDimension::CostEvicted, values.cost_evicted),
                (CounterDimension::MaxCost, values.max_cost),
            ];
            for (dimension, value) in dimensions {
                points.push(CounterPoint {
                    kind,
                    namespace: namespace.clone(),
                    dimension,
                    value,
                });
            }
        }
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_of(points: &[CounterPoint], kind: CacheKind, dimension: CounterDimension) -> i64 {
        points
            .iter()
            .find(|p| p.kind == kind && p.dimension == dimension)
            .map(|p| p.value)
            .unwrap()
    }

    #[test]
    fn records_events() {
        let counters = CounterSet::new(10);
        counters.record(CacheEvent::Miss);
        counters.record(CacheEvent::Added(3));
        counters.record(CacheEvent::Hit);
        counters.record(CacheEvent::Updated(-1));
        counters.record(CacheEvent::Evicted(2));

        let values = counters.values();
        assert_eq!(values.hits, 1);
        assert_eq!(values.misses, 1);
        assert_eq!(values.added, 1);
        assert_eq!(values.updated, 1);
        assert_eq!(values.evicted, 1);
        assert_eq!(values.current_cost(), 0);
        assert_eq!(values.max_cost, 10);
    }

    #[test]
    fn observe_goes_to_registered_series() {
        let recorder = CacheStatsRecorder::new();
        let main = NamespaceId::main("v1");
        let flag = NamespaceId::feature_flag("v1", "myff");
        recorder.register(CacheKind::Plan, &main, 5);
        recorder.register(CacheKind::Plan, &flag, 5);

        recorder.observe(CacheKind::Plan, &main, CacheEvent::Hit);
        recorder.observe(CacheKind::Plan, &main, CacheEvent::Hit);
        recorder.observe(CacheKind::Plan, &flag, CacheEvent::Miss);
        // unregistered series are ignored
        recorder.observe(CacheKind::Validation, &main, CacheEvent::Miss);

        assert_eq!(recorder.counters(CacheKind::Plan, &main).unwrap().values().hits, 2);
        assert_eq!(recorder.counters(CacheKind::Plan, &flag).unwrap().values().misses, 1);
        assert!(recorder.counters(CacheKind::Validation, &main).is_none());
    }

    #[test]
    fn register_is_idempotent() {
        let recorder = CacheStatsRecorder::new();
        let ns = NamespaceId::main("v1");
        let a = recorder.register(CacheKind::Validation, &ns, 1);
        let b = recorder.register(CacheKind::Validation, &ns, 1);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn snapshot_renders_all_dimensions() {
        let recorder = CacheStatsRecorder::new();
        let ns = NamespaceId::main("v1");
        let counters = recorder.register(CacheKind::Validation, &ns, 1);
        counters.record(CacheEvent::Miss);
        counters.record(CacheEvent::Added(1));
        counters.record(CacheEvent::Evicted(1));

        let points = recorder.snapshot();
        assert_eq!(points.len(), 8);
        assert_eq!(value_of(&points, CacheKind::Validation, CounterDimension::Misses), 1);
        assert_eq!(value_of(&points, CacheKind::Validation, CounterDimension::KeysEvicted), 1);
        assert_eq!(value_of(&points, CacheKind::Validation, CounterDimension::CostEvicted), 1);
        assert_eq!(value_of(&points, CacheKind::Validation, CounterDimension::MaxCost), 1);
    }

    #[test]
    fn forget_config_version_drops_only_that_version() {
        let recorder = CacheStatsRecorder::new();
        recorder.register(CacheKind::Plan, &NamespaceId::main("v1"), 1);
        recorder.register(CacheKind::Plan, &NamespaceId::feature_flag("v1", "ff"), 1);
        recorder.register(CacheKind::Plan, &NamespaceId::main("v2"), 1);

        assert_eq!(recorder.forget_config_version("v1"), 2);
        assert!(recorder.counters(CacheKind::Plan, &NamespaceId::main("v2")).is_some());
    }
}
