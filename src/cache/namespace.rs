//! Cache namespaces.
//!
//! # Responsibilities
//! - Identify a namespace by (router config version, feature flag)
//! - Create the cache set of a namespace once, on first use
//! - Drop all namespaces of a superseded config version as a unit
//!
//! # Design Decisions
//! - The namespace map is an immutable snapshot behind `ArcSwap`; lookups are lock-free
//! - Creation and eviction serialize on a mutex and publish a new snapshot
//! - Cache sets are `Arc`s: a request holding one keeps it alive past eviction

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::cache::cost_cache::CostAwareCache;
use crate::cache::key::CacheKey;
use crate::cache::stats::CacheStatsRecorder;
use crate::cache::CacheKind;
use crate::config::schema::EngineConfig;
use crate::pipeline::engine::{ExecutionPlan, NormalizedOperation, ValidationOutcome};

/// Isolation unit of the operation caches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NamespaceId {
    config_version: String,
    /// Empty for the main graph.
    feature_flag: String,
}

impl NamespaceId {
    /// Namespace of the main graph.
    pub fn main(config_version: impl Into<String>) -> Self {
        Self {
            config_version: config_version.into(),
            feature_flag: String::new(),
        }
    }

    /// Namespace of a feature flag.
    pub fn feature_flag(config_version: impl Into<String>, flag: impl Into<String>) -> Self {
        Self {
            config_version: config_version.into(),
            feature_flag: flag.into(),
        }
    }

    pub fn config_version(&self) -> &str {
        &self.config_version
    }

    /// Feature flag name, `None` for the main graph.
    pub fn feature_flag_name(&self) -> Option<&str> {
        (!self.feature_flag.is_empty()).then_some(self.feature_flag.as_str())
    }

    pub fn is_main(&self) -> bool {
        self.feature_flag.is_empty()
    }
}

impl std::fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.feature_flag_name() {
            Some(flag) => write!(f, "{}/{}", self.config_version, flag),
            None => write!(f, "{}/main", self.config_version),
        }
    }
}

/// Capacity of each cache kind. `None` means the kind is disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheSizes {
    pub normalization: Option<i64>,
    pub validation: Option<i64>,
    pub plan: Option<i64>,
    pub persisted_query_normalization: Option<i64>,
    pub query_hash: Option<i64>,
}

impl CacheSizes {
    /// Derive sizes from engine settings.
    ///
    /// The operation hash cache only exists when something consumes the SHA-256.
    pub fn from_engine(engine: &EngineConfig, compute_sha256: bool) -> Self {
        fn enabled(on: bool, size: i64) -> Option<i64> {
            (on && size > 0).then_some(size)
        }

        Self {
            normalization: enabled(
                engine.enable_normalization_cache,
                engine.normalization_cache_size,
            ),
            validation: enabled(engine.enable_validation_cache, engine.validation_cache_size),
            plan: enabled(true, engine.execution_plan_cache_size),
            persisted_query_normalization: enabled(
                engine.enable_persisted_operations_cache,
                engine.persisted_operations_cache_size,
            ),
            query_hash: enabled(compute_sha256, engine.operation_hash_cache_size),
        }
    }

    pub fn get(&self, kind: CacheKind) -> Option<i64> {
        match kind {
            CacheKind::Normalization => self.normalization,
            CacheKind::Validation => self.validation,
            CacheKind::Plan => self.plan,
            CacheKind::PersistedQueryNormalization => self.persisted_query_normalization,
            CacheKind::QueryHash => self.query_hash,
        }
    }
}

/// The caches of one namespace.
pub struct CacheSet {
    namespace: NamespaceId,
    pub normalization: Option<CostAwareCache<CacheKey, Arc<NormalizedOperation>>>,
    pub validation: Option<CostAwareCache<CacheKey, ValidationOutcome>>,
    pub plan: Option<CostAwareCache<CacheKey, ExecutionPlan>>,
    pub persisted_query_normalization: Option<CostAwareCache<CacheKey, Arc<NormalizedOperation>>>,
    pub query_hash: Option<CostAwareCache<CacheKey, Arc<str>>>,
}

impl CacheSet {
    /// Build the caches of a namespace, registering each one with the recorder.
    pub fn new(namespace: NamespaceId, sizes: &CacheSizes, recorder: &CacheStatsRecorder) -> Self {
        fn build<V: Clone>(
            kind: CacheKind,
            namespace: &NamespaceId,
            size: Option<i64>,
            recorder: &CacheStatsRecorder,
        ) -> Option<CostAwareCache<CacheKey, V>> {
            size.map(|max_cost| {
                let counters = recorder.register(kind, namespace, max_cost);
                CostAwareCache::new(kind, max_cost, counters)
            })
        }

        Self {
            normalization: build(
                CacheKind::Normalization,
                &namespace,
                sizes.normalization,
                recorder,
            ),
            validation: build(CacheKind::Validation, &namespace, sizes.validation, recorder),
            plan: build(CacheKind::Plan, &namespace, sizes.plan, recorder),
            persisted_query_normalization: build(
                CacheKind::PersistedQueryNormalization,
                &namespace,
                sizes.persisted_query_normalization,
                recorder,
            ),
            query_hash: build(CacheKind::QueryHash, &namespace, sizes.query_hash, recorder),
            namespace,
        }
    }

    pub fn namespace(&self) -> &NamespaceId {
        &self.namespace
    }

    /// Kinds that are enabled in this set.
    pub fn enabled_kinds(&self) -> Vec<CacheKind> {
        let mut kinds = Vec::new();
        if self.persisted_query_normalization.is_some() {
            kinds.push(CacheKind::PersistedQueryNormalization);
        }
        if self.normalization.is_some() {
            kinds.push(CacheKind::Normalization);
        }
        if self.validation.is_some() {
            kinds.push(CacheKind::Validation);
        }
        if self.plan.is_some() {
            kinds.push(CacheKind::Plan);
        }
        if self.query_hash.is_some() {
            kinds.push(CacheKind::QueryHash);
        }
        kinds
    }
}

impl std::fmt::Debug for CacheSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSet")
            .field("namespace", &self.namespace)
            .field("enabled", &self.enabled_kinds())
            .finish()
    }
}

/// Maps namespaces to their cache sets.
pub struct CacheNamespaceRegistry {
    namespaces: ArcSwap<HashMap<NamespaceId, Arc<CacheSet>>>,
    write_lock: Mutex<()>,
    recorder: Arc<CacheStatsRecorder>,
}

impl CacheNamespaceRegistry {
    pub fn new(recorder: Arc<CacheStatsRecorder>) -> Self {
        Self {
            namespaces: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(()),
            recorder,
        }
    }

    /// Return the cache set of a namespace, creating it on first use.
    ///
    /// `sizes` only matter on creation; later calls get the existing set.
    pub fn resolve(&self, namespace: &NamespaceId, sizes: &CacheSizes) -> Arc<CacheSet> {
        if let Some(set) = self.namespaces.load().get(namespace) {
            return set.clone();
        }

        let _guard = self.write_lock.lock();
        let current = self.namespaces.load_full();
        // another caller may have created it while we waited
        if let Some(set) = current.get(namespace) {
            return set.clone();
        }

        let set = Arc::new(CacheSet::new(namespace.clone(), sizes, &self.recorder));
        let mut next = HashMap::clone(&current);
        next.insert(namespace.clone(), set.clone());
        self.namespaces.store(Arc::new(next));

        tracing::info!(
            namespace = %namespace,
            caches = ?set.enabled_kinds(),
            "Created cache namespace"
        );
        set
    }

    /// Look up a namespace without creating it.
    pub fn get(&self, namespace: &NamespaceId) -> Option<Arc<CacheSet>> {
        self.namespaces.load().get(namespace).cloned()
    }

    /// Drop every namespace of a config version. Returns how many were dropped.
    ///
    /// Entries are not evicted one by one; the caches are freed when the last
    /// in-flight request releases its `Arc<CacheSet>`.
    pub fn evict(&self, config_version: &str) -> usize {
        self.retain(|ns| ns.config_version() != config_version)
    }

    /// Drop every namespace whose config version differs from `config_version`.
    pub fn evict_except(&self, config_version: &str) -> usize {
        self.retain(|ns| ns.config_version() == config_version)
    }

    fn retain(&self, keep: impl Fn(&NamespaceId) -> bool) -> usize {
        let _guard = self.write_lock.lock();
        let current = self.namespaces.load_full();
        let (kept, dropped): (HashMap<_, _>, HashMap<_, _>) =
            current.iter().map(|(k, v)| (k.clone(), v.clone())).partition(|(ns, _)| keep(ns));
        if dropped.is_empty() {
            return 0;
        }

        self.namespaces.store(Arc::new(kept));
        let mut versions: Vec<&str> = dropped.keys().map(|ns| ns.config_version()).collect();
        versions.sort_unstable();
        versions.dedup();
        for version in versions {
            self.recorder.forget_config_version(version);
        }

        for ns in dropped.keys() {
            tracing::info!(namespace = %ns, "Evicted cache namespace");
        }
        dropped.len()
    }

    /// Active namespaces, sorted.
    pub fn namespaces(&self) -> Vec<NamespaceId> {
        let mut ids: Vec<_> = self.namespaces.load().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.namespaces.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.load().is_empty()
    }

    pub fn recorder(&self) -> &Arc<CacheStatsRecorder> {
        &self.recorder
    }
}
