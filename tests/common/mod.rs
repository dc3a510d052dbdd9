//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use federation_router::config::RouterConfig;
use federation_router::pipeline::{
    EngineError, ExecutionPlan, GraphqlEngine, NormalizedOperation, PassthroughEngine,
    ValidationOutcome,
};
use federation_router::RouterInstance;

/// Lexical engine that counts how often each stage runs.
#[derive(Default)]
pub struct CountingEngine {
    inner: PassthroughEngine,
    pub normalized: AtomicUsize,
    pub validated: AtomicUsize,
    pub planned: AtomicUsize,
    pub loaded: AtomicUsize,
}

impl CountingEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register_persisted(&self, client_name: &str, sha256_hash: &str, text: &str) {
        self.inner.register_persisted(client_name, sha256_hash, text);
    }

    /// (normalize, validate, plan) call counts.
    pub fn calls(&self) -> (usize, usize, usize) {
        (
            self.normalized.load(Ordering::SeqCst),
            self.validated.load(Ordering::SeqCst),
            self.planned.load(Ordering::SeqCst),
        )
    }
}

impl GraphqlEngine for CountingEngine {
    fn normalize(
        &self,
        query: &str,
        operation_name: Option<&str>,
    ) -> Result<NormalizedOperation, EngineError> {
        self.normalized.fetch_add(1, Ordering::SeqCst);
        self.inner.normalize(query, operation_name)
    }

    fn validate(&self, operation: &NormalizedOperation) -> ValidationOutcome {
        self.validated.fetch_add(1, Ordering::SeqCst);
        self.inner.validate(operation)
    }

    fn plan(&self, operation: &NormalizedOperation) -> Result<ExecutionPlan, EngineError> {
        self.planned.fetch_add(1, Ordering::SeqCst);
        self.inner.plan(operation)
    }

    fn load_persisted_operation(
        &self,
        client_name: &str,
        sha256_hash: &str,
    ) -> Result<String, EngineError> {
        self.loaded.fetch_add(1, Ordering::SeqCst);
        self.inner.load_persisted_operation(client_name, sha256_hash)
    }
}

/// Config with cache metrics on and the given version.
pub fn config(version: &str) -> RouterConfig {
    let mut config = RouterConfig::default();
    config.router.cluster_name = "test-cluster".into();
    config.router.graph_id = "graph-1".into();
    config.router.config_version = version.into();
    config.telemetry.metrics.graphql_cache = true;
    config.telemetry.metrics.engine_stats.subscriptions = true;
    config
}

pub fn router(config: RouterConfig, engine: Arc<CountingEngine>) -> Arc<RouterInstance> {
    RouterInstance::build(config, engine).expect("router builds")
}
