//! Cached operation preparation.
//!
//! # Data Flow
//! ```text
//! OperationRequest
//!     → persisted query cache (hash-only or APQ registration requests)
//!     → normalization cache   (inline operations)
//!     → validation cache      (keyed by normalized hash)
//!     → plan cache            (keyed by normalized hash)
//!     → operation hash cache  (SHA-256 of the normalized text, when consumed)
//!     → PreparedOperation
//! ```
//!
//! A miss calls the engine and stores the artifact with the base cost. A
//! refused store is not an error; the next request simply recomputes.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::cache::{CacheKey, CacheSet, CostAwareCache, NamespaceId};
use crate::pipeline::engine::{
    EngineError, ExecutionPlan, GraphqlEngine, NormalizedOperation, OperationRequest,
    ValidationOutcome,
};
use crate::telemetry::attributes::keys;

/// Cost charged for every artifact.
pub const BASE_COST: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("request has neither a query nor a persisted query hash")]
    MissingQuery,

    #[error("provided sha256 hash does not match the query")]
    PersistedQueryHashMismatch,

    #[error("operation is invalid: {}", .0.join("; "))]
    InvalidOperation(Vec<String>),
}

/// Which caches answered a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheHits {
    pub persisted: bool,
    pub normalization: bool,
    pub validation: bool,
    pub plan: bool,
}

impl CacheHits {
    /// Span attributes describing the hits.
    pub fn attributes(&self) -> [(&'static str, bool); 4] {
        [
            (keys::PERSISTED_OPERATION_CACHE_HIT, self.persisted),
            (keys::NORMALIZATION_CACHE_HIT, self.normalization),
            (keys::VALIDATION_CACHE_HIT, self.validation),
            (keys::PLAN_CACHE_HIT, self.plan),
        ]
    }
}

/// Everything needed to execute an operation.
#[derive(Debug, Clone)]
pub struct PreparedOperation {
    pub operation: Arc<NormalizedOperation>,
    pub plan: ExecutionPlan,
    /// Hex SHA-256 of the normalized text, when requested.
    pub sha256: Option<Arc<str>>,
    pub persisted_id: Option<String>,
    pub cache_hits: CacheHits,
    pub namespace: NamespaceId,
}

/// Prepares operations for one namespace.
#[derive(Clone)]
pub struct OperationPipeline {
    engine: Arc<dyn GraphqlEngine>,
    caches: Arc<CacheSet>,
    compute_sha256: bool,
}

impl OperationPipeline {
    pub fn new(
        engine: Arc<dyn GraphqlEngine>,
        caches: Arc<CacheSet>,
        compute_sha256: bool,
    ) -> Self {
        Self {
            engine,
            caches,
            compute_sha256,
        }
    }

    pub fn namespace(&self) -> &NamespaceId {
        self.caches.namespace()
    }

    pub fn caches(&self) -> &Arc<CacheSet> {
        &self.caches
    }

    /// Normalize, validate and plan a request, consulting the caches first.
    pub fn prepare(&self, request: &OperationRequest) -> Result<PreparedOperation, PipelineError> {
        let mut hits = CacheHits::default();
        let operation_name = request.operation_name.as_deref();
        let query = request.query.as_deref().filter(|q| !q.trim().is_empty());

        let client_name = request.client.name.as_str();
        let (operation, persisted_id) = match (&request.persisted_query, query) {
            (Some(persisted), query) => {
                let key =
                    CacheKey::for_persisted(client_name, &persisted.sha256_hash, operation_name);
                let operation = match cached(&self.caches.persisted_query_normalization, &key) {
                    Some(operation) => {
                        hits.persisted = true;
                        operation
                    }
                    None => {
                        let text = match query {
                            Some(text) => {
                                // automatic persisted query registration
                                if sha256_hex(text) != persisted.sha256_hash {
                                    return Err(PipelineError::PersistedQueryHashMismatch);
                                }
                                text.to_string()
                            }
                            None => self
                                .engine
                                .load_persisted_operation(client_name, &persisted.sha256_hash)?,
                        };
                        let operation = Arc::new(self.engine.normalize(&text, operation_name)?);
                        store(&self.caches.persisted_query_normalization, key, operation.clone());
                        operation
                    }
                };
                (operation, Some(persisted.sha256_hash.clone()))
            }
            (None, Some(query)) => {
                let key =
                    CacheKey::for_operation(query, operation_name, request.variables.as_ref());
                let operation = match cached(&self.caches.normalization, &key) {
                    Some(operation) => {
                        hits.normalization = true;
                        operation
                    }
                    None => {
                        let operation = Arc::new(self.engine.normalize(query, operation_name)?);
                        store(&self.caches.normalization, key, operation.clone());
                        operation
                    }
                };
                (operation, None)
            }
            (None, None) => return Err(PipelineError::MissingQuery),
        };

        let key = CacheKey::from_hash(operation.hash);

        let outcome: ValidationOutcome = match cached(&self.caches.validation, &key) {
            Some(outcome) => {
                hits.validation = true;
                outcome
            }
            None => {
                let outcome = self.engine.validate(&operation);
                store(&self.caches.validation, key, outcome.clone());
                outcome
            }
        };
        if !outcome.valid {
            return Err(PipelineError::InvalidOperation(outcome.errors.to_vec()));
        }

        let plan = match cached(&self.caches.plan, &key) {
            Some(plan) => {
                hits.plan = true;
                plan
            }
            None => {
                let plan = self.engine.plan(&operation)?;
                store(&self.caches.plan, key, plan.clone());
                plan
            }
        };

        let sha256 = self.compute_sha256.then(|| {
            cached(&self.caches.query_hash, &key).unwrap_or_else(|| {
                let digest: Arc<str> = Arc::from(sha256_hex(&operation.content));
                store(&self.caches.query_hash, key, digest.clone());
                digest
            })
        });

        tracing::debug!(
            namespace = %self.caches.namespace(),
            operation_hash = %key,
            persisted = hits.persisted,
            normalization_hit = hits.normalization,
            validation_hit = hits.validation,
            plan_hit = hits.plan,
            "Prepared operation"
        );

        Ok(PreparedOperation {
            operation,
            plan,
            sha256,
            persisted_id,
            cache_hits: hits,
            namespace: self.caches.namespace().clone(),
        })
    }
}

fn cached<V: Clone>(cache: &Option<CostAwareCache<CacheKey, V>>, key: &CacheKey) -> Option<V> {
    cache.as_ref().and_then(|cache| cache.get(key))
}

fn store<V: Clone>(cache: &Option<CostAwareCache<CacheKey, V>>, key: CacheKey, value: V) {
    if let Some(cache) = cache {
        cache.set(key, value, BASE_COST);
    }
}

/// Lowercase hex SHA-256 of a string.
pub fn sha256_hex(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}
