//! Metric rendering.
//!
//! # Data Flow
//! ```text
//! CacheStatsRecorder.snapshot()     ─┐
//! EngineStatisticsTracker.snapshot() ├─→ collect() → base attributes per series
//! RequestMetricStore                ─┘                → MetricFilter (exclusions)
//!                                                      → ResourceMetrics
//! ```
//!
//! # Design Decisions
//! - Settings live behind `ArcSwap` and are replaced on config reload
//! - Cache and engine families are gated by their own switches
//! - Engine statistics belong to the instance, so they only carry the current config version

use std::sync::Arc;

use arc_swap::ArcSwap;
use uuid::Uuid;

use crate::cache::{CacheStatsRecorder, CounterDimension, NamespaceId};
use crate::config::schema::RouterConfig;
use crate::statistics::EngineStatisticsTracker;
use crate::telemetry::attributes::{keys, AttributeError, CustomAttributeSet, RouterIdentity};
use crate::telemetry::context::{RequestContext, SubgraphContext};
use crate::telemetry::filter::{FilterError, MetricFilter};
use crate::telemetry::model::{
    self, AttributeSet, AttributeValue, Metric, ResourceMetrics, ScopeMetrics,
};
use crate::telemetry::request_metrics::{
    operation_attributes, subgraph_attributes, RequestMetricStore,
};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("invalid custom attributes: {}", join_errors(.0))]
    Attributes(Vec<AttributeError>),
}

/// Reloadable emitter settings.
#[derive(Debug, Clone, Default)]
pub struct EmitterSettings {
    pub enabled: bool,
    pub graphql_cache: bool,
    pub engine_stats: bool,
    pub filter: MetricFilter,
    pub attributes: CustomAttributeSet,
    pub config_version: String,
}

impl EmitterSettings {
    pub fn from_config(config: &RouterConfig) -> Result<Self, TelemetryError> {
        let metrics = &config.telemetry.metrics;
        Ok(Self {
            enabled: metrics.enabled,
            graphql_cache: metrics.graphql_cache,
            engine_stats: metrics.engine_stats.subscriptions,
            filter: MetricFilter::new(&metrics.exclude_metrics, &metrics.exclude_metric_labels)?,
            attributes: CustomAttributeSet::compile(&metrics.attributes)
                .map_err(TelemetryError::Attributes)?,
            config_version: config.router.config_version.clone(),
        })
    }
}

pub struct TelemetryEmitter {
    identity: RouterIdentity,
    instance_id: Uuid,
    settings: ArcSwap<EmitterSettings>,
    cache_stats: Arc<CacheStatsRecorder>,
    engine: Arc<EngineStatisticsTracker>,
    requests: RequestMetricStore,
}

impl TelemetryEmitter {
    pub fn new(
        identity: RouterIdentity,
        settings: EmitterSettings,
        cache_stats: Arc<CacheStatsRecorder>,
        engine: Arc<EngineStatisticsTracker>,
    ) -> Self {
        Self {
            identity,
            instance_id: Uuid::new_v4(),
            settings: ArcSwap::from_pointee(settings),
            cache_stats,
            engine,
            requests: RequestMetricStore::new(),
        }
    }

    pub fn identity(&self) -> &RouterIdentity {
        &self.identity
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn settings(&self) -> Arc<EmitterSettings> {
        self.settings.load_full()
    }

    /// Swap in new settings; counters are kept.
    pub fn reconfigure(&self, settings: EmitterSettings) {
        tracing::info!(
            config_version = %settings.config_version,
            graphql_cache = settings.graphql_cache,
            engine_stats = settings.engine_stats,
            "Telemetry emitter reconfigured"
        );
        self.settings.store(Arc::new(settings));
    }

    /// Count a finished operation.
    pub fn record_operation(
        &self,
        namespace: &NamespaceId,
        request: &RequestContext,
        failed: bool,
    ) {
        let settings = self.settings.load();
        if !settings.enabled {
            return;
        }
        let mut attributes = self
            .identity
            .base_attributes(namespace.config_version(), namespace.feature_flag_name());
        attributes.extend(operation_attributes(request));
        settings.attributes.resolve_router(request, &mut attributes);
        self.requests.record(namespace.config_version(), attributes, failed);
    }

    /// Count a finished subgraph fetch.
    pub fn record_subgraph_fetch(
        &self,
        namespace: &NamespaceId,
        request: &RequestContext,
        subgraph: &SubgraphContext,
        failed: bool,
    ) {
        let settings = self.settings.load();
        if !settings.enabled {
            return;
        }
        let mut attributes = self
            .identity
            .base_attributes(namespace.config_version(), namespace.feature_flag_name());
        attributes.extend(subgraph_attributes(request, subgraph));
        settings.attributes.resolve_subgraph(request, subgraph, &mut attributes);
        self.requests.record(namespace.config_version(), attributes, failed);
    }

    /// Forget request series of every other config version.
    pub fn retain_config_version(&self, config_version: &str) -> usize {
        self.requests.retain_config_version(config_version)
    }

    /// Render one collection cycle.
    pub fn collect(&self) -> ResourceMetrics {
        let settings = self.settings.load();
        let mut scopes = Vec::new();

        if settings.graphql_cache {
            push_scope(&mut scopes, model::SCOPE_CACHE, self.cache_metrics());
        }
        if settings.engine_stats {
            let engine = self.engine_metrics(&settings.config_version);
            push_scope(&mut scopes, model::SCOPE_ENGINE, engine);
        }
        push_scope(&mut scopes, model::SCOPE_REQUEST, self.requests.collect());

        let mut resource = ResourceMetrics {
            resource: self.resource_attributes(),
            scope_metrics: scopes,
        };
        settings.filter.apply(&mut resource);
        resource
    }

    fn resource_attributes(&self) -> AttributeSet {
        let mut set = AttributeSet::new();
        set.insert("service.name".into(), AttributeValue::from(env!("CARGO_PKG_NAME")));
        set.insert(
            "service.version".into(),
            AttributeValue::from(self.identity.router_version.as_str()),
        );
        set.insert(
            "service.instance.id".into(),
            AttributeValue::from(self.instance_id.to_string()),
        );
        set
    }

    fn cache_metrics(&self) -> Vec<Metric> {
        let mut requests = Metric::sum(model::CACHE_REQUESTS_STATS, "Cache hits and misses", true);
        let mut keys_stats =
            Metric::sum(model::CACHE_KEYS_STATS, "Cache keys added, updated and evicted", true);
        let mut cost =
            Metric::sum(model::CACHE_COST_STATS, "Cost added to and evicted from the cache", true);
        let mut max = Metric::gauge(model::CACHE_COST_MAX, "Configured cache capacity");

        for point in self.cache_stats.snapshot() {
            let mut attributes = self.identity.base_attributes(
                point.namespace.config_version(),
                point.namespace.feature_flag_name(),
            );
            attributes.insert(keys::CACHE_TYPE.into(), AttributeValue::from(point.kind.as_str()));

            let (metric, label_key) = match point.dimension {
                CounterDimension::Hits | CounterDimension::Misses => {
                    (&mut requests, Some(keys::CACHE_REQUEST_TYPE))
                }
                CounterDimension::KeysAdded
                | CounterDimension::KeysUpdated
                | CounterDimension::KeysEvicted => (&mut keys_stats, Some(keys::CACHE_OPERATION)),
                CounterDimension::CostAdded | CounterDimension::CostEvicted => {
                    (&mut cost, Some(keys::CACHE_OPERATION))
                }
                CounterDimension::MaxCost => (&mut max, None),
            };
            if let Some(label_key) = label_key {
                attributes.insert(label_key.into(), AttributeValue::from(point.dimension.label()));
            }
            metric.push(attributes, point.value);
        }

        vec![requests, keys_stats, cost, max]
            .into_iter()
            .filter(|m| !m.data_points.is_empty())
            .collect()
    }

    fn engine_metrics(&self, config_version: &str) -> Vec<Metric> {
        let snapshot = self.engine.snapshot();
        let attributes = self.identity.base_attributes(config_version, None);

        let gauges = [
            (model::ENGINE_CONNECTIONS, "Number of open connections", snapshot.connections),
            (model::ENGINE_SUBSCRIPTIONS, "Number of active subscriptions", snapshot.subscriptions),
            (model::ENGINE_TRIGGERS, "Number of active triggers", snapshot.triggers),
        ];
        let mut metrics: Vec<Metric> = gauges
            .into_iter()
            .map(|(name, description, value)| {
                let mut metric = Metric::sum(name, description, false);
                metric.push(attributes.clone(), value);
                metric
            })
            .collect();

        let mut sent =
            Metric::sum(model::ENGINE_MESSAGES_SENT, "Number of subscription updates sent", true);
        sent.push(attributes, i64::try_from(snapshot.messages_sent).unwrap_or(i64::MAX));
        metrics.push(sent);
        metrics
    }
}

pub(crate) fn join_errors(errors: &[AttributeError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

fn push_scope(scopes: &mut Vec<ScopeMetrics>, scope: &str, metrics: Vec<Metric>) {
    if !metrics.is_empty() {
        scopes.push(ScopeMetrics {
            scope: scope.to_string(),
            metrics,
        });
    }
}

impl std::fmt::Debug for TelemetryEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryEmitter")
            .field("identity", &self.identity)
            .field("instance_id", &self.instance_id)
            .finish()
    }
}
