//! Request and subgraph context read by custom attributes.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use crate::pipeline::{ClientInfo, OperationType, PreparedOperation};

/// Operation details known once the request has been prepared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationInfo {
    pub name: Option<String>,
    pub operation_type: Option<OperationType>,
    /// Normalized operation hash as a decimal string.
    pub hash: Option<String>,
    pub sha256: Option<String>,
    pub persisted_id: Option<String>,
}

/// Everything known about an inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Lowercased header names.
    headers: HashMap<String, String>,
    pub method: String,
    pub path: String,
    pub host: String,
    pub operation: OperationInfo,
    pub client: ClientInfo,
    pub error: Option<String>,
    pub auth_claims: Option<Value>,
    pub trace_sampled: bool,
    /// Subgraphs the request fetched from.
    pub services: Vec<String>,
    pub error_codes: Vec<String>,
    /// Subgraphs that returned errors.
    pub error_services: Vec<String>,
    pub config_version: String,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_client(mut self, client: ClientInfo) -> Self {
        self.client = client;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_claims(mut self, claims: Value) -> Self {
        self.auth_claims = Some(claims);
        self
    }

    /// Header value, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Record the outcome of operation preparation.
    pub fn apply_prepared(&mut self, prepared: &PreparedOperation) {
        self.operation = OperationInfo {
            name: prepared.operation.name.clone(),
            operation_type: Some(prepared.operation.operation_type),
            hash: Some(prepared.operation.hash.to_string()),
            sha256: prepared.sha256.as_deref().map(str::to_string),
            persisted_id: prepared.persisted_id.clone(),
        };
        self.services = prepared.plan.subgraphs.to_vec();
        self.config_version = prepared.namespace.config_version().to_string();
    }

    /// Claim at a dotted path, e.g. `sub` or `realm_access.roles`.
    pub fn claim(&self, path: &[String]) -> Option<&Value> {
        let mut current = self.auth_claims.as_ref()?;
        for segment in path {
            current = current.get(segment.as_str())?;
        }
        Some(current)
    }
}

/// Connection timings of one subgraph fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientTrace {
    pub conn_acquire: Option<Duration>,
    pub dns: Option<Duration>,
    pub tls: Option<Duration>,
    pub fetch: Option<Duration>,
}

/// A single fetch to a subgraph.
#[derive(Debug, Clone, Default)]
pub struct SubgraphContext {
    pub name: String,
    pub id: String,
    pub error: Option<String>,
    pub client_trace: ClientTrace,
}

impl SubgraphContext {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            ..Self::default()
        }
    }
}
