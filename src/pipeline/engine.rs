//! Contract with the GraphQL execution engine.
//!
//! The router does not parse, validate or plan GraphQL itself. An engine
//! implementing [`GraphqlEngine`] computes those artifacts; the pipeline
//! caches whatever it returns.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// GraphQL operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Query,
    Mutation,
    Subscription,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Query => "query",
            OperationType::Mutation => "mutation",
            OperationType::Subscription => "subscription",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `extensions.persistedQuery` of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedQuery {
    pub sha256_hash: String,
}

/// Client identity taken from the `graphql-client-name`/`-version` headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// An inbound GraphQL request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    /// Operation text. May be absent for persisted operations.
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default)]
    pub persisted_query: Option<PersistedQuery>,
    #[serde(skip)]
    pub client: ClientInfo,
}

impl OperationRequest {
    /// Request carrying only operation text.
    pub fn query(text: impl Into<String>) -> Self {
        Self {
            query: Some(text.into()),
            ..Self::default()
        }
    }

    /// Request referencing a persisted operation.
    pub fn persisted(sha256_hash: impl Into<String>) -> Self {
        Self {
            persisted_query: Some(PersistedQuery {
                sha256_hash: sha256_hash.into(),
            }),
            ..Self::default()
        }
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn with_client(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client = ClientInfo {
            name: name.into(),
            version: version.into(),
        };
        self
    }
}

/// Result of normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedOperation {
    /// Normalized operation text.
    pub content: String,
    /// Name of the selected operation, if any.
    pub name: Option<String>,
    pub operation_type: OperationType,
    /// Stable hash of `content`. Keys the validation and plan caches.
    pub hash: u64,
}

/// Result of validation. Invalid operations are cached too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Arc<[String]>,
}

impl ValidationOutcome {
    pub fn valid() -> Self {
        Self {
            valid: true,
            errors: Arc::from(Vec::new()),
        }
    }

    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors: Arc::from(errors),
        }
    }
}

/// An execution plan. The engine's plan document is opaque to the router.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub root: Arc<Value>,
    /// Subgraphs the plan fetches from.
    pub subgraphs: Arc<[String]>,
}

/// Failure reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("failed to parse operation: {0}")]
    Parse(String),

    #[error("operation {0:?} not found in document")]
    OperationNotFound(String),

    #[error("persisted operation {0} not found")]
    PersistedOperationNotFound(String),

    #[error("failed to plan operation: {0}")]
    Planning(String),
}

/// The external GraphQL engine. Implementations must be cheap to call concurrently.
pub trait GraphqlEngine: Send + Sync {
    /// Normalize operation text and select the operation to execute.
    fn normalize(
        &self,
        query: &str,
        operation_name: Option<&str>,
    ) -> Result<NormalizedOperation, EngineError>;

    /// Validate a normalized operation against the schema.
    fn validate(&self, operation: &NormalizedOperation) -> ValidationOutcome;

    /// Build an execution plan for a valid operation.
    fn plan(&self, operation: &NormalizedOperation) -> Result<ExecutionPlan, EngineError>;

    /// Fetch the text of a persisted operation registered by a client.
    fn load_persisted_operation(
        &self,
        client_name: &str,
        sha256_hash: &str,
    ) -> Result<String, EngineError>;
}
