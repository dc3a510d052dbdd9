//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the router.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the router.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouterConfig {
    /// Router identity and active graph version.
    pub router: RouterSection,

    /// Execution engine cache settings.
    pub engine: EngineConfig,

    /// Metrics and tracing settings.
    pub telemetry: TelemetryConfig,

    /// Logging settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Router identity and the graph version currently served.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterSection {
    /// Cluster the router belongs to (`wg.router.cluster.name`).
    pub cluster_name: String,

    /// Federated graph id (`wg.federated_graph.id`).
    pub graph_id: String,

    /// Version of the router execution config. A change triggers a new cache namespace.
    pub config_version: String,

    /// Feature flags served next to the main graph.
    pub feature_flags: Vec<String>,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            graph_id: String::new(),
            config_version: "1".to_string(),
            feature_flags: Vec::new(),
        }
    }
}

/// Operation cache sizes. A size of 0 disables the cache.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub enable_normalization_cache: bool,
    pub normalization_cache_size: i64,

    pub enable_validation_cache: bool,
    pub validation_cache_size: i64,

    /// Plan cache has no switch of its own; size 0 disables it.
    pub execution_plan_cache_size: i64,

    pub enable_persisted_operations_cache: bool,
    pub persisted_operations_cache_size: i64,

    /// Only used when some attribute reads the operation SHA-256.
    pub operation_hash_cache_size: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_normalization_cache: true,
            normalization_cache_size: 1024,
            enable_validation_cache: true,
            validation_cache_size: 1024,
            execution_plan_cache_size: 1024,
            enable_persisted_operations_cache: true,
            persisted_operations_cache_size: 1024,
            operation_hash_cache_size: 2048,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TelemetryConfig {
    pub metrics: MetricsConfig,
    pub tracing: TracingConfig,
}

/// Metric collection and export settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metric collection and export.
    pub enabled: bool,

    /// Interval of the periodic reader in seconds.
    pub export_interval_secs: u64,

    /// Render the `router.graphql.cache.*` metrics.
    pub graphql_cache: bool,

    pub engine_stats: EngineStatsConfig,

    /// Custom attributes added to request metrics.
    pub attributes: Vec<CustomAttributeConfig>,

    /// Regexes of metric names that are never exported.
    pub exclude_metrics: Vec<String>,

    /// Regexes of attribute keys stripped from exported points.
    pub exclude_metric_labels: Vec<String>,

    pub prometheus: PrometheusConfig,

    pub debug_export: DebugExportConfig,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            export_interval_secs: 15,
            graphql_cache: false,
            engine_stats: EngineStatsConfig::default(),
            attributes: Vec::new(),
            exclude_metrics: Vec::new(),
            exclude_metric_labels: Vec::new(),
            prometheus: PrometheusConfig::default(),
            debug_export: DebugExportConfig::default(),
        }
    }
}

/// Which engine statistics are rendered.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineStatsConfig {
    /// Render `router.engine.*` subscription statistics.
    pub subscriptions: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PrometheusConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:8088".to_string(),
        }
    }
}

/// Logs every metric point around each flush. Never changes what is exported.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DebugExportConfig {
    pub enabled: bool,

    /// Regexes of metric names left out of the debug log.
    pub exclude_metrics: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TracingConfig {
    /// Custom attributes added to spans.
    pub attributes: Vec<CustomAttributeConfig>,
}

/// A custom attribute: `{key, default, value_from}`.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CustomAttributeConfig {
    /// Exported attribute name. May be empty for context fields, which then
    /// keep their well-known name.
    #[serde(default)]
    pub key: String,

    /// Value used when the source yields nothing.
    #[serde(default)]
    pub default: Option<String>,

    #[serde(default)]
    pub value_from: Option<ValueFromConfig>,
}

/// Source of a custom attribute value. Exactly one field should be set.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ValueFromConfig {
    pub request_header: Option<String>,
    pub context_field: Option<String>,
    pub expression: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON lines instead of human-readable logs.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:9090".to_string(),
            api_key: "change-me-in-production".to_string(),
        }
    }
}
