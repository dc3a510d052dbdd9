//! Operation cache subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound operation
//!     → namespace.rs (resolve (config version, feature flag) → CacheSet)
//!     → cost_cache.rs (get / set with cost accounting and eviction)
//!         → sketch.rs (access frequency used to pick eviction victims)
//!     → stats.rs (every hit, miss, add, update and eviction is counted)
//!
//! On config reload:
//!     registry drops the superseded namespaces as a unit
//!     → requests still holding the old CacheSet keep using it
//!     → memory is freed when the last Arc goes away
//! ```
//!
//! # Design Decisions
//! - One cache instance per kind and namespace; nothing is shared across namespaces
//! - Reads never take the policy lock; only admission and eviction do
//! - Counters are plain atomics, read independently by the exporter

pub mod cost_cache;
pub mod key;
pub mod namespace;
pub mod sketch;
pub mod stats;

use serde::Serialize;

pub use cost_cache::CostAwareCache;
pub use key::CacheKey;
pub use namespace::{CacheNamespaceRegistry, CacheSet, CacheSizes, NamespaceId};
pub use stats::{CacheEvent, CacheStatsRecorder, CounterDimension, CounterPoint, CounterSet};

/// The kind of artifact held by a cache instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    /// Normalized operations keyed by operation text and variable shape.
    Normalization,
    /// Validation outcomes keyed by normalized operation hash.
    Validation,
    /// Execution plans keyed by normalized operation hash.
    Plan,
    /// Normalized persisted operations keyed by persisted query id.
    PersistedQueryNormalization,
    /// SHA-256 digests of normalized operations.
    QueryHash,
}

impl CacheKind {
    /// All kinds, in the order the pipeline consults them.
    pub const ALL: [CacheKind; 5] = [
        CacheKind::PersistedQueryNormalization,
        CacheKind::Normalization,
        CacheKind::Validation,
        CacheKind::Plan,
        CacheKind::QueryHash,
    ];

    /// Value of the `cache_type` metric attribute.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Normalization => "query_normalization",
            CacheKind::Validation => "validation",
            CacheKind::Plan => "plan",
            CacheKind::PersistedQueryNormalization => "persisted_query_normalization",
            CacheKind::QueryHash => "query_hash",
        }
    }
}

impl std::fmt::Display for CacheKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
