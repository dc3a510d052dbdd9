//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration and compile custom attributes
//! - Create the cache namespaces of the main graph and every feature flag
//! - Wire the engine statistics tracker and telemetry emitter
//! - Own the metric reader, whose exporters follow the live config
//!
//! # Design Decisions
//! - Fail fast: an invalid attribute expression or regex is fatal
//! - One `RouterInstance` owns every shared component; nothing is global
//! - Pipelines are swapped as a set so a request never mixes config versions

use std::collections::HashMap;
use std::net::AddrParseError;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use metrics_exporter_prometheus::BuildError;

use crate::cache::{CacheNamespaceRegistry, CacheSizes, CacheStatsRecorder, NamespaceId};
use crate::config::schema::RouterConfig;
use crate::config::validation::validate_config;
use crate::config::ConfigError;
use crate::observability::metrics::PrometheusEndpoint;
use crate::pipeline::{
    GraphqlEngine, OperationPipeline, OperationRequest, PipelineError, PreparedOperation,
};
use crate::statistics::EngineStatisticsTracker;
use crate::telemetry::attributes::{insert_str, keys, CustomAttributeSet, RouterIdentity};
use crate::telemetry::context::{RequestContext, SubgraphContext};
use crate::telemetry::emitter::{join_errors, EmitterSettings, TelemetryEmitter, TelemetryError};
use crate::telemetry::model::{AttributeSet, AttributeValue};
use crate::telemetry::reader::PeriodicReader;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("invalid tracing attributes: {}", join_errors(.0))]
    TracingAttributes(Vec<crate::telemetry::attributes::AttributeError>),

    #[error("invalid Prometheus listen address: {0}")]
    ListenAddr(#[from] AddrParseError),

    #[error("failed to start Prometheus endpoint: {0}")]
    Prometheus(#[from] BuildError),
}

/// Pipelines of one config version.
pub(crate) struct PipelineSet {
    pub(crate) config_version: String,
    pub(crate) main: OperationPipeline,
    pub(crate) flags: HashMap<String, OperationPipeline>,
}

/// Settings derived from a config and compiled once.
pub(crate) struct CompiledConfig {
    pub(crate) emitter: EmitterSettings,
    pub(crate) tracing_attributes: CustomAttributeSet,
    pub(crate) compute_sha256: bool,
}

impl CompiledConfig {
    pub(crate) fn compile(config: &RouterConfig) -> Result<Self, StartupError> {
        validate_config(config).map_err(ConfigError::Validation)?;
        let emitter = EmitterSettings::from_config(config)?;
        let tracing_attributes = CustomAttributeSet::compile(&config.telemetry.tracing.attributes)
            .map_err(StartupError::TracingAttributes)?;
        let compute_sha256 =
            emitter.attributes.requires_sha256() || tracing_attributes.requires_sha256();
        Ok(Self {
            emitter,
            tracing_attributes,
            compute_sha256,
        })
    }
}

/// A running router: config, caches, statistics and telemetry.
pub struct RouterInstance {
    pub(crate) config: ArcSwap<RouterConfig>,
    pub(crate) engine: Arc<dyn GraphqlEngine>,
    pub(crate) registry: Arc<CacheNamespaceRegistry>,
    pub(crate) pipelines: ArcSwap<PipelineSet>,
    pub(crate) tracing_attributes: ArcSwap<CustomAttributeSet>,
    pub(crate) statistics: Arc<EngineStatisticsTracker>,
    pub(crate) emitter: Arc<TelemetryEmitter>,
    pub(crate) reader: Arc<PeriodicReader>,
    pub(crate) prometheus: Option<PrometheusEndpoint>,
}

impl RouterInstance {
    /// Build without a scrape endpoint. A Prometheus exporter still writes to
    /// whatever `metrics` recorder is in scope.
    pub fn build(
        config: RouterConfig,
        engine: Arc<dyn GraphqlEngine>,
    ) -> Result<Arc<Self>, StartupError> {
        Self::assemble(config, engine, None)
    }

    /// Build and serve Prometheus whenever a config enables it.
    pub fn build_with_prometheus(
        config: RouterConfig,
        engine: Arc<dyn GraphqlEngine>,
        endpoint: PrometheusEndpoint,
    ) -> Result<Arc<Self>, StartupError> {
        Self::assemble(config, engine, Some(endpoint))
    }

    fn assemble(
        config: RouterConfig,
        engine: Arc<dyn GraphqlEngine>,
        prometheus: Option<PrometheusEndpoint>,
    ) -> Result<Arc<Self>, StartupError> {
        let compiled = CompiledConfig::compile(&config)?;
        ensure_endpoint(prometheus.as_ref(), &config)?;

        let recorder = Arc::new(CacheStatsRecorder::new());
        let registry = Arc::new(CacheNamespaceRegistry::new(recorder.clone()));
        let statistics = Arc::new(EngineStatisticsTracker::new());
        let identity = RouterIdentity::new(
            config.router.cluster_name.clone(),
            config.router.graph_id.clone(),
        );
        let emitter = Arc::new(TelemetryEmitter::new(
            identity,
            compiled.emitter,
            recorder,
            statistics.clone(),
        ));
        let reader = Arc::new(PeriodicReader::new(
            emitter.clone(),
            Duration::from_secs(config.telemetry.metrics.export_interval_secs),
        ));
        reader
            .reconfigure(&config.telemetry.metrics)
            .map_err(TelemetryError::from)?;

        let pipelines = build_pipelines(&config, &engine, &registry, compiled.compute_sha256);

        tracing::info!(
            config_version = %config.router.config_version,
            feature_flags = config.router.feature_flags.len(),
            namespaces = registry.len(),
            instance_id = %emitter.instance_id(),
            "Router instance built"
        );

        Ok(Arc::new(Self {
            config: ArcSwap::from_pointee(config),
            engine,
            registry,
            pipelines: ArcSwap::from_pointee(pipelines),
            tracing_attributes: ArcSwap::from_pointee(compiled.tracing_attributes),
            statistics,
            emitter,
            reader,
            prometheus,
        }))
    }

    pub fn config(&self) -> Arc<RouterConfig> {
        self.config.load_full()
    }

    pub fn config_version(&self) -> String {
        self.pipelines.load().config_version.clone()
    }

    pub fn registry(&self) -> &Arc<CacheNamespaceRegistry> {
        &self.registry
    }

    pub fn cache_stats(&self) -> &Arc<CacheStatsRecorder> {
        self.registry.recorder()
    }

    pub fn statistics(&self) -> &Arc<EngineStatisticsTracker> {
        &self.statistics
    }

    pub fn emitter(&self) -> &Arc<TelemetryEmitter> {
        &self.emitter
    }

    /// The metric reader. The caller runs it; reloads reconfigure it.
    pub fn reader(&self) -> &Arc<PeriodicReader> {
        &self.reader
    }

    pub fn prometheus(&self) -> Option<&PrometheusEndpoint> {
        self.prometheus.as_ref()
    }

    /// Pipeline of a feature flag. Unknown flags fall back to the main graph.
    pub fn pipeline(&self, feature_flag: Option<&str>) -> OperationPipeline {
        let set = self.pipelines.load();
        match feature_flag.and_then(|flag| set.flags.get(flag)) {
            Some(pipeline) => pipeline.clone(),
            None => {
                if let Some(flag) = feature_flag {
                    tracing::debug!(
                        feature_flag = flag,
                        "Unknown feature flag, serving main graph"
                    );
                }
                set.main.clone()
            }
        }
    }

    /// Prepare an operation and count it in the request metrics.
    pub fn execute_operation(
        &self,
        request: &OperationRequest,
        context: &mut RequestContext,
        feature_flag: Option<&str>,
    ) -> Result<PreparedOperation, PipelineError> {
        if context.client.name.is_empty() && context.client.version.is_empty() {
            context.client = request.client.clone();
        }

        let pipeline = self.pipeline(feature_flag);
        let result = pipeline.prepare(request);
        match &result {
            Ok(prepared) => {
                context.apply_prepared(prepared);
                self.emitter
                    .record_operation(&prepared.namespace, context, context.error.is_some());
            }
            Err(err) => {
                context.config_version = pipeline.namespace().config_version().to_string();
                context.error = Some(err.to_string());
                self.emitter.record_operation(pipeline.namespace(), context, true);
            }
        }
        result
    }

    /// Count a subgraph fetch made for a prepared operation.
    pub fn record_subgraph_fetch(
        &self,
        prepared: &PreparedOperation,
        context: &RequestContext,
        subgraph: &SubgraphContext,
    ) {
        let failed = subgraph.error.is_some();
        self.emitter
            .record_subgraph_fetch(&prepared.namespace, context, subgraph, failed);
    }

    /// Span attributes of a prepared operation.
    pub fn span_attributes(
        &self,
        prepared: &PreparedOperation,
        context: &RequestContext,
    ) -> AttributeSet {
        let namespace = &prepared.namespace;
        let mut set = self
            .emitter
            .identity()
            .base_attributes(namespace.config_version(), namespace.feature_flag_name());
        let operation_name = prepared.operation.name.as_deref().unwrap_or_default();
        insert_str(&mut set, keys::OPERATION_NAME, operation_name);
        insert_str(&mut set, keys::OPERATION_TYPE, prepared.operation.operation_type.as_str());
        insert_str(&mut set, keys::OPERATION_HASH, &prepared.operation.hash.to_string());
        for (key, hit) in prepared.cache_hits.attributes() {
            set.insert(key.to_string(), AttributeValue::Bool(hit));
        }
        self.tracing_attributes.load().resolve_router(context, &mut set);
        set
    }
}

impl std::fmt::Debug for RouterInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterInstance")
            .field("config_version", &self.config_version())
            .field("namespaces", &self.registry.namespaces())
            .finish()
    }
}

/// Start the scrape endpoint if the config asks for one and it is not up yet.
pub(crate) fn ensure_endpoint(
    endpoint: Option<&PrometheusEndpoint>,
    config: &RouterConfig,
) -> Result<(), StartupError> {
    let metrics = &config.telemetry.metrics;
    match endpoint {
        Some(endpoint) if metrics.prometheus.enabled => {
            let addr = metrics.prometheus.listen_addr.parse()?;
            endpoint.ensure(addr, Duration::from_secs(metrics.export_interval_secs))?;
            Ok(())
        }
        _ => Ok(()),
    }
}

pub(crate) fn build_pipelines(
    config: &RouterConfig,
    engine: &Arc<dyn GraphqlEngine>,
    registry: &CacheNamespaceRegistry,
    compute_sha256: bool,
) -> PipelineSet {
    let version = &config.router.config_version;
    let sizes = CacheSizes::from_engine(&config.engine, compute_sha256);
    let pipeline = |namespace: NamespaceId| {
        OperationPipeline::new(engine.clone(), registry.resolve(&namespace, &sizes), compute_sha256)
    };

    let flags = config
        .router
        .feature_flags
        .iter()
        .map(|flag| {
            let namespace = NamespaceId::feature_flag(version.clone(), flag.clone());
            (flag.clone(), pipeline(namespace))
        })
        .collect();

    PipelineSet {
        config_version: version.clone(),
        main: pipeline(NamespaceId::main(version.clone())),
        flags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheKind;
    use crate::config::schema::{CustomAttributeConfig, ValueFromConfig};
    use crate::pipeline::PassthroughEngine;
    use crate::telemetry::model::{self, HTTP_REQUESTS, HTTP_REQUESTS_ERROR};

    fn config() -> RouterConfig {
        let mut config = RouterConfig::default();
        config.router.config_version = "v1".into();
        config.router.feature_flags = vec!["myff".into()];
        config.telemetry.metrics.graphql_cache = true;
        config
    }

    fn instance(config: RouterConfig) -> Arc<RouterInstance> {
        RouterInstance::build(config, Arc::new(PassthroughEngine::new())).unwrap()
    }

    #[test]
    fn creates_namespace_per_feature_flag() {
        let router = instance(config());
        assert_eq!(
            router.registry().namespaces(),
            vec![NamespaceId::main("v1"), NamespaceId::feature_flag("v1", "myff")]
        );
        assert_eq!(
            router.pipeline(Some("myff")).namespace(),
            &NamespaceId::feature_flag("v1", "myff")
        );
        assert_eq!(router.pipeline(Some("other")).namespace(), &NamespaceId::main("v1"));
    }

    #[test]
    fn feature_flag_caches_are_isolated() {
        let router = instance(config());
        let request = OperationRequest::query("{ employees { id } }");

        let mut ctx = RequestContext::new("POST", "/graphql");
        router.execute_operation(&request, &mut ctx, None).unwrap();
        let mut ctx = RequestContext::new("POST", "/graphql");
        let flagged = router.execute_operation(&request, &mut ctx, Some("myff")).unwrap();
        assert!(!flagged.cache_hits.plan);

        let resource = router.emitter().collect();
        let hits = resource.find(model::CACHE_REQUESTS_STATS).unwrap();
        let plan = AttributeValue::from(CacheKind::Plan.as_str());
        let misses = AttributeValue::from("misses");
        let main_misses = hits
            .data_points
            .iter()
            .find(|p| {
                p.attribute(keys::FEATURE_FLAG).is_none()
                    && p.attribute(keys::CACHE_TYPE) == Some(&plan)
                    && p.attribute(keys::CACHE_REQUEST_TYPE) == Some(&misses)
            })
            .unwrap();
        assert_eq!(main_misses.value, 1);
    }

    #[test]
    fn failed_operations_are_counted_as_errors() {
        let router = instance(config());
        let mut ctx = RequestContext::new("POST", "/graphql");
        let err = router
            .execute_operation(&OperationRequest::default(), &mut ctx, None)
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingQuery));
        assert!(ctx.error.is_some());

        let resource = router.emitter().collect();
        assert_eq!(resource.find(HTTP_REQUESTS).unwrap().data_points[0].value, 1);
        assert_eq!(resource.find(HTTP_REQUESTS_ERROR).unwrap().data_points[0].value, 1);
    }

    #[test]
    fn invalid_expression_refuses_to_start() {
        let mut config = config();
        config.telemetry.metrics.attributes = vec![CustomAttributeConfig {
            key: "bad".into(),
            default: None,
            value_from: Some(ValueFromConfig {
                expression: Some("request.header.Get(".into()),
                ..ValueFromConfig::default()
            }),
        }];
        let err = RouterInstance::build(config, Arc::new(PassthroughEngine::new())).unwrap_err();
        assert!(matches!(err, StartupError::Config(ConfigError::Validation(_))));
    }

    #[test]
    fn reader_follows_startup_config() {
        let mut config = config();
        config.telemetry.metrics.export_interval_secs = 30;
        config.telemetry.metrics.prometheus.enabled = true;
        let router = instance(config);

        assert!(router.prometheus().is_none());
        assert_eq!(router.reader().interval(), Duration::from_secs(30));
        assert_eq!(router.reader().exporter_names(), vec!["prometheus"]);
    }

    #[test]
    fn sha256_consumers_enable_query_hash_cache() {
        let mut config = config();
        config.telemetry.tracing.attributes = vec![CustomAttributeConfig {
            key: String::new(),
            default: None,
            value_from: Some(ValueFromConfig {
                context_field: Some("operation_sha256".into()),
                ..ValueFromConfig::default()
            }),
        }];
        let router = instance(config);
        let caches = router.registry().get(&NamespaceId::main("v1")).unwrap();
        assert!(caches.enabled_kinds().contains(&CacheKind::QueryHash));

        let mut ctx = RequestContext::new("POST", "/graphql");
        let prepared = router
            .execute_operation(&OperationRequest::query("{ a }"), &mut ctx, None)
            .unwrap();
        assert!(prepared.sha256.is_some());

        let span = router.span_attributes(&prepared, &ctx);
        assert!(span.contains_key(keys::OPERATION_SHA256));
        assert_eq!(span.get(keys::PLAN_CACHE_HIT), Some(&AttributeValue::Bool(false)));
    }
}
