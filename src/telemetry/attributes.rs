//! Metric attribute dimensioning.
//!
//! # Responsibilities
//! - Base attributes that separate series per graph version and feature flag
//! - Custom attributes resolved from headers, context fields or expressions
//! - Renaming of well-known attributes through a custom `key`
//!
//! # Design Decisions
//! - Sources are compiled once; resolution never parses anything
//! - Subgraph-scoped attributes are only resolved for subgraph fetches
//! - Resolution order: source value, then `default`, then omitted. An empty
//!   string counts as no value

use std::collections::BTreeSet;
use std::str::FromStr;

use crate::config::schema::CustomAttributeConfig;
use crate::telemetry::context::{RequestContext, SubgraphContext};
use crate::telemetry::expr::{ExprError, Expression};
use crate::telemetry::model::{AttributeSet, AttributeValue};

/// Well-known attribute keys.
pub mod keys {
    pub const ROUTER_CLUSTER_NAME: &str = "wg.router.cluster.name";
    pub const FEDERATED_GRAPH_ID: &str = "wg.federated_graph.id";
    pub const ROUTER_VERSION: &str = "wg.router.version";
    pub const ROUTER_CONFIG_VERSION: &str = "wg.router.config.version";
    pub const FEATURE_FLAG: &str = "wg.feature_flag";

    pub const OPERATION_NAME: &str = "wg.operation.name";
    pub const OPERATION_TYPE: &str = "wg.operation.type";
    pub const OPERATION_HASH: &str = "wg.operation.hash";
    pub const OPERATION_SHA256: &str = "wg.operation.sha256";
    pub const OPERATION_PROTOCOL: &str = "wg.operation.protocol";
    pub const OPERATION_PERSISTED_ID: &str = "wg.operation.persisted_id";
    pub const OPERATION_SERVICE_NAMES: &str = "wg.operation.service_names";
    pub const GRAPHQL_ERROR_CODES: &str = "wg.graphql.error.codes";
    pub const GRAPHQL_ERROR_SERVICE_NAMES: &str = "wg.graphql.error.service_names";
    pub const REQUEST_ERROR: &str = "wg.request.error";

    pub const CLIENT_NAME: &str = "wg.client.name";
    pub const CLIENT_VERSION: &str = "wg.client.version";

    pub const SUBGRAPH_NAME: &str = "wg.subgraph.name";
    pub const SUBGRAPH_ID: &str = "wg.subgraph.id";

    pub const PLAN_CACHE_HIT: &str = "wg.engine.plan_cache_hit";
    pub const PERSISTED_OPERATION_CACHE_HIT: &str = "wg.engine.persisted_operation_cache_hit";
    pub const NORMALIZATION_CACHE_HIT: &str = "wg.normalization_cache_hit";
    pub const VALIDATION_CACHE_HIT: &str = "wg.validation_cache_hit";

    pub const CACHE_TYPE: &str = "cache_type";
    pub const CACHE_REQUEST_TYPE: &str = "type";
    pub const CACHE_OPERATION: &str = "operation";
}

/// Identity attached to every exported point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterIdentity {
    pub cluster_name: String,
    pub graph_id: String,
    pub router_version: String,
}

impl RouterIdentity {
    pub fn new(cluster_name: impl Into<String>, graph_id: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            graph_id: graph_id.into(),
            router_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Base attributes of a series. Feature flag series carry the flag name.
    pub fn base_attributes(
        &self,
        config_version: &str,
        feature_flag: Option<&str>,
    ) -> AttributeSet {
        let mut set = AttributeSet::new();
        insert_str(&mut set, keys::ROUTER_CLUSTER_NAME, &self.cluster_name);
        insert_str(&mut set, keys::FEDERATED_GRAPH_ID, &self.graph_id);
        insert_str(&mut set, keys::ROUTER_VERSION, &self.router_version);
        insert_str(&mut set, keys::ROUTER_CONFIG_VERSION, config_version);
        if let Some(flag) = feature_flag {
            insert_str(&mut set, keys::FEATURE_FLAG, flag);
        }
        set
    }
}

/// Insert a string attribute unless it is empty.
pub fn insert_str(set: &mut AttributeSet, key: &str, value: &str) {
    if !value.is_empty() {
        set.insert(key.to_string(), AttributeValue::String(value.to_string()));
    }
}

/// Request fields a custom attribute can read by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextField {
    OperationName,
    OperationType,
    OperationHash,
    OperationSha256,
    PersistedOperationSha256,
    OperationServiceNames,
    GraphqlErrorCodes,
    GraphqlErrorServiceNames,
    RequestError,
    RouterConfigVersion,
}

impl ContextField {
    /// Exported name when the attribute has no `key`.
    pub fn default_key(&self) -> &'static str {
        match self {
            ContextField::OperationName => keys::OPERATION_NAME,
            ContextField::OperationType => keys::OPERATION_TYPE,
            ContextField::OperationHash => keys::OPERATION_HASH,
            ContextField::OperationSha256 => keys::OPERATION_SHA256,
            ContextField::PersistedOperationSha256 => keys::OPERATION_PERSISTED_ID,
            ContextField::OperationServiceNames => keys::OPERATION_SERVICE_NAMES,
            ContextField::GraphqlErrorCodes => keys::GRAPHQL_ERROR_CODES,
            ContextField::GraphqlErrorServiceNames => keys::GRAPHQL_ERROR_SERVICE_NAMES,
            ContextField::RequestError => keys::REQUEST_ERROR,
            ContextField::RouterConfigVersion => keys::ROUTER_CONFIG_VERSION,
        }
    }

    fn resolve(&self, request: &RequestContext) -> Option<AttributeValue> {
        let operation = &request.operation;
        let text = |v: &Option<String>| {
            v.clone().filter(|s| !s.is_empty()).map(AttributeValue::String)
        };
        let list = |v: &Vec<String>| {
            (!v.is_empty()).then(|| AttributeValue::StringSlice(v.clone()))
        };
        match self {
            ContextField::OperationName => text(&operation.name),
            ContextField::OperationType => operation
                .operation_type
                .map(|t| AttributeValue::String(t.as_str().to_string())),
            ContextField::OperationHash => text(&operation.hash),
            ContextField::OperationSha256 => text(&operation.sha256),
            ContextField::PersistedOperationSha256 => text(&operation.persisted_id),
            ContextField::OperationServiceNames => list(&request.services),
            ContextField::GraphqlErrorCodes => list(&request.error_codes),
            ContextField::GraphqlErrorServiceNames => list(&request.error_services),
            ContextField::RequestError => {
                request.error.as_ref().map(|_| AttributeValue::Bool(true))
            }
            ContextField::RouterConfigVersion => text(&Some(request.config_version.clone())),
        }
    }
}

impl FromStr for ContextField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "operation_name" => Ok(ContextField::OperationName),
            "operation_type" => Ok(ContextField::OperationType),
            "operation_hash" => Ok(ContextField::OperationHash),
            "operation_sha256" => Ok(ContextField::OperationSha256),
            "persisted_operation_sha256" => Ok(ContextField::PersistedOperationSha256),
            "operation_service_names" => Ok(ContextField::OperationServiceNames),
            "graphql_error_codes" => Ok(ContextField::GraphqlErrorCodes),
            "graphql_error_service_names" => Ok(ContextField::GraphqlErrorServiceNames),
            "request_error" => Ok(ContextField::RequestError),
            "router_config_version" => Ok(ContextField::RouterConfigVersion),
            other => Err(other.to_string()),
        }
    }
}

/// Where an attribute value comes from.
#[derive(Debug, Clone)]
pub enum ValueSource {
    Header(String),
    Context(ContextField),
    Expression(Expression),
    /// Only the configured default.
    Static,
}

/// Which data points an attribute may be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeScope {
    /// Request-level and subgraph-level points.
    Router,
    /// Subgraph fetch points only.
    Subgraph,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AttributeError {
    #[error("attribute {key:?}: invalid expression {expression:?}: {source}")]
    Expression {
        key: String,
        expression: String,
        #[source]
        source: ExprError,
    },

    #[error("attribute {key:?}: unknown context field {field:?}")]
    UnknownContextField { key: String, field: String },

    #[error("custom attribute without a key")]
    MissingKey,

    #[error(
        "attribute {key:?}: value_from must set exactly one of \
         request_header, context_field, expression"
    )]
    AmbiguousSource { key: String },
}

#[derive(Debug, Clone)]
pub struct CustomAttribute {
    pub key: String,
    pub default: Option<String>,
    pub source: ValueSource,
    pub scope: AttributeScope,
}

impl CustomAttribute {
    pub fn compile(config: &CustomAttributeConfig) -> Result<Self, AttributeError> {
        let value_from = config.value_from.clone().unwrap_or_default();
        let set = [
            value_from.request_header.is_some(),
            value_from.context_field.is_some(),
            value_from.expression.is_some(),
        ]
        .into_iter()
        .filter(|s| *s)
        .count();
        if set > 1 {
            return Err(AttributeError::AmbiguousSource {
                key: config.key.clone(),
            });
        }

        let source = if let Some(header) = value_from.request_header {
            ValueSource::Header(header)
        } else if let Some(field) = value_from.context_field {
            let field = field.parse().map_err(|field| AttributeError::UnknownContextField {
                key: config.key.clone(),
                field,
            })?;
            ValueSource::Context(field)
        } else if let Some(expression) = value_from.expression {
            let compiled =
                Expression::compile(&expression).map_err(|source| AttributeError::Expression {
                    key: config.key.clone(),
                    expression: expression.clone(),
                    source,
                })?;
            ValueSource::Expression(compiled)
        } else {
            ValueSource::Static
        };

        let key = match (&source, config.key.is_empty()) {
            (_, false) => config.key.clone(),
            (ValueSource::Context(field), true) => field.default_key().to_string(),
            (_, true) => return Err(AttributeError::MissingKey),
        };

        let scope = match &source {
            ValueSource::Expression(expr) if expr.uses_subgraph() => AttributeScope::Subgraph,
            _ => AttributeScope::Router,
        };

        Ok(Self {
            key,
            default: config.default.clone().filter(|d| !d.is_empty()),
            source,
            scope,
        })
    }

    /// The well-known key this attribute replaces, if it renames one.
    fn renames(&self) -> Option<&'static str> {
        match &self.source {
            ValueSource::Context(field) if field.default_key() != self.key => {
                Some(field.default_key())
            }
            _ => None,
        }
    }

    fn resolve(
        &self,
        request: &RequestContext,
        subgraph: Option<&SubgraphContext>,
    ) -> Option<AttributeValue> {
        let value = match &self.source {
            ValueSource::Header(name) => request
                .header(name)
                .filter(|v| !v.is_empty())
                .map(AttributeValue::from),
            ValueSource::Context(field) => field.resolve(request),
            ValueSource::Expression(expression) => match expression.evaluate(request, subgraph) {
                Ok(value) => value.into_attribute(),
                Err(err) => {
                    tracing::debug!(
                        attribute = %self.key,
                        expression = expression.source(),
                        error = %err,
                        "Attribute expression failed"
                    );
                    None
                }
            },
            ValueSource::Static => None,
        };
        value.or_else(|| self.default.as_deref().map(AttributeValue::from))
    }
}

/// The compiled custom attributes of one config.
#[derive(Debug, Clone, Default)]
pub struct CustomAttributeSet {
    attributes: Vec<CustomAttribute>,
    renamed: BTreeSet<&'static str>,
}

impl CustomAttributeSet {
    pub fn compile(configs: &[CustomAttributeConfig]) -> Result<Self, Vec<AttributeError>> {
        let mut attributes = Vec::new();
        let mut errors = Vec::new();
        for config in configs {
            match CustomAttribute::compile(config) {
                Ok(attribute) => attributes.push(attribute),
                Err(err) => errors.push(err),
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        let renamed = attributes.iter().filter_map(CustomAttribute::renames).collect();
        Ok(Self { attributes, renamed })
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn attributes(&self) -> &[CustomAttribute] {
        &self.attributes
    }

    /// Whether any attribute needs the operation SHA-256.
    pub fn requires_sha256(&self) -> bool {
        self.attributes.iter().any(|a| match &a.source {
            ValueSource::Context(field) => *field == ContextField::OperationSha256,
            ValueSource::Expression(expr) => expr.reads_sha256(),
            _ => false,
        })
    }

    /// Add attributes for a request-level point.
    pub fn resolve_router(&self, request: &RequestContext, out: &mut AttributeSet) {
        self.strip_renamed(out);
        for attribute in self.attributes.iter().filter(|a| a.scope == AttributeScope::Router) {
            if let Some(value) = attribute.resolve(request, None) {
                out.insert(attribute.key.clone(), value);
            }
        }
    }

    /// Add attributes for a subgraph fetch point.
    pub fn resolve_subgraph(
        &self,
        request: &RequestContext,
        subgraph: &SubgraphContext,
        out: &mut AttributeSet,
    ) {
        self.strip_renamed(out);
        for attribute in &self.attributes {
            if let Some(value) = attribute.resolve(request, Some(subgraph)) {
                out.insert(attribute.key.clone(), value);
            }
        }
    }

    fn strip_renamed(&self, out: &mut AttributeSet) {
        for key in &self.renamed {
            out.remove(*key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ValueFromConfig;
    use crate::telemetry::context::OperationInfo;

    fn attr(
        key: &str,
        default: Option<&str>,
        value_from: ValueFromConfig,
    ) -> CustomAttributeConfig {
        CustomAttributeConfig {
            key: key.to_string(),
            default: default.map(str::to_string),
            value_from: Some(value_from),
        }
    }

    fn context_field(field: &str) -> ValueFromConfig {
        ValueFromConfig {
            context_field: Some(field.to_string()),
            ..ValueFromConfig::default()
        }
    }

    fn expression(source: &str) -> ValueFromConfig {
        ValueFromConfig {
            expression: Some(source.to_string()),
            ..ValueFromConfig::default()
        }
    }

    fn request() -> RequestContext {
        let mut request = RequestContext::new("POST", "/graphql").with_header("x-tenant", "acme");
        request.operation = OperationInfo {
            name: Some("Employees".into()),
            hash: Some("1234".into()),
            ..OperationInfo::default()
        };
        request
    }

    #[test]
    fn base_attributes_carry_feature_flag() {
        let identity = RouterIdentity::new("cluster-a", "graph-1");
        let main = identity.base_attributes("v1", None);
        let flag = identity.base_attributes("v1", Some("myff"));
        assert!(!main.contains_key(keys::FEATURE_FLAG));
        assert_eq!(flag.get(keys::FEATURE_FLAG), Some(&AttributeValue::from("myff")));
        assert_eq!(main.get(keys::ROUTER_CONFIG_VERSION), Some(&AttributeValue::from("v1")));
    }

    #[test]
    fn renaming_replaces_well_known_key() {
        let renamed = attr("my_operation_hash", None, context_field("operation_hash"));
        let set = CustomAttributeSet::compile(&[renamed]).unwrap();
        let mut out = AttributeSet::new();
        out.insert(keys::OPERATION_HASH.to_string(), AttributeValue::from("1234"));

        set.resolve_router(&request(), &mut out);
        assert!(!out.contains_key(keys::OPERATION_HASH));
        assert_eq!(out.get("my_operation_hash"), Some(&AttributeValue::from("1234")));
    }

    #[test]
    fn context_field_without_key_keeps_default_name() {
        let unnamed = attr("", None, context_field("operation_name"));
        let set = CustomAttributeSet::compile(&[unnamed]).unwrap();
        let mut out = AttributeSet::new();
        set.resolve_router(&request(), &mut out);
        assert_eq!(out.get(keys::OPERATION_NAME), Some(&AttributeValue::from("Employees")));
    }

    #[test]
    fn default_applies_when_source_is_empty() {
        let header = ValueFromConfig {
            request_header: Some("x-missing".into()),
            ..ValueFromConfig::default()
        };
        let set = CustomAttributeSet::compile(&[
            attr("from_header", Some("none"), header),
            attr("no_default", None, expression("request.header.Get('x-missing')")),
            attr("static", Some("fixed"), ValueFromConfig::default()),
        ])
        .unwrap();
        let mut out = AttributeSet::new();
        set.resolve_router(&request(), &mut out);

        assert_eq!(out.get("from_header"), Some(&AttributeValue::from("none")));
        assert!(!out.contains_key("no_default"));
        assert_eq!(out.get("static"), Some(&AttributeValue::from("fixed")));
    }

    #[test]
    fn subgraph_attributes_stay_out_of_router_points() {
        let set = CustomAttributeSet::compile(&[
            attr("subgraph", None, expression("subgraph.name")),
            attr("tenant", None, expression("request.header.Get('x-tenant')")),
        ])
        .unwrap();
        assert_eq!(set.attributes()[0].scope, AttributeScope::Subgraph);

        let mut router = AttributeSet::new();
        set.resolve_router(&request(), &mut router);
        assert!(!router.contains_key("subgraph"));
        assert_eq!(router.get("tenant"), Some(&AttributeValue::from("acme")));

        let mut fetch = AttributeSet::new();
        set.resolve_subgraph(&request(), &SubgraphContext::new("employees", "0"), &mut fetch);
        assert_eq!(fetch.get("subgraph"), Some(&AttributeValue::from("employees")));
        assert_eq!(fetch.get("tenant"), Some(&AttributeValue::from("acme")));
    }

    #[test]
    fn invalid_configs_report_every_error() {
        let errors = CustomAttributeSet::compile(&[
            attr("a", None, expression("request.testing.method")),
            attr("b", None, context_field("not_a_field")),
            attr("", None, expression("request.url.method")),
        ])
        .unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(matches!(errors[0], AttributeError::Expression { .. }));
        assert!(matches!(errors[1], AttributeError::UnknownContextField { .. }));
        assert_eq!(errors[2], AttributeError::MissingKey);
    }

    #[test]
    fn detects_sha256_consumers() {
        let hash = attr("h", None, context_field("operation_hash"));
        let plain = CustomAttributeSet::compile(&[hash]).unwrap();
        assert!(!plain.requires_sha256());
        let sha256 = attr("s", None, context_field("operation_sha256"));
        let sha = CustomAttributeSet::compile(&[sha256]).unwrap();
        assert!(sha.requires_sha256());
    }
}
