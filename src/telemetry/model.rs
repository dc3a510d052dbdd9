//! Exported metric data model.
//!
//! Mirrors the OTLP shape: resource → scopes → metrics → data points. All
//! instruments are int64; sums are cumulative.

use std::collections::BTreeMap;

use serde::Serialize;

pub const CACHE_REQUESTS_STATS: &str = "router.graphql.cache.requests.stats";
pub const CACHE_KEYS_STATS: &str = "router.graphql.cache.keys.stats";
pub const CACHE_COST_STATS: &str = "router.graphql.cache.cost.stats";
pub const CACHE_COST_MAX: &str = "router.graphql.cache.cost.max";

pub const ENGINE_CONNECTIONS: &str = "router.engine.connections";
pub const ENGINE_SUBSCRIPTIONS: &str = "router.engine.subscriptions";
pub const ENGINE_TRIGGERS: &str = "router.engine.triggers";
pub const ENGINE_MESSAGES_SENT: &str = "router.engine.messages.sent";

pub const HTTP_REQUESTS: &str = "router.http.requests";
pub const HTTP_REQUESTS_ERROR: &str = "router.http.requests.error";

/// Instrumentation scopes.
pub const SCOPE_CACHE: &str = "router.cache";
pub const SCOPE_ENGINE: &str = "router.engine";
pub const SCOPE_REQUEST: &str = "router.request";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Temporality {
    Cumulative,
    Delta,
}

impl Temporality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Temporality::Cumulative => "CumulativeTemporality",
            Temporality::Delta => "DeltaTemporality",
        }
    }
}

/// Instrument kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MetricKind {
    Sum { monotonic: bool },
    Gauge,
}

impl MetricKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            MetricKind::Sum { .. } => "Sum[int64]",
            MetricKind::Gauge => "Gauge[int64]",
        }
    }

    pub fn is_monotonic(&self) -> bool {
        matches!(self, MetricKind::Sum { monotonic: true })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    String(String),
    StringSlice(Vec<String>),
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::Bool(v) => write!(f, "{v}"),
            AttributeValue::Int(v) => write!(f, "{v}"),
            AttributeValue::String(v) => f.write_str(v),
            AttributeValue::StringSlice(v) => write!(f, "[{}]", v.join(",")),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(v: Vec<String>) -> Self {
        AttributeValue::StringSlice(v)
    }
}

/// Sorted attribute set; equal sets identify the same series.
pub type AttributeSet = BTreeMap<String, AttributeValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    pub attributes: AttributeSet,
    pub value: i64,
}

impl DataPoint {
    pub fn new(attributes: AttributeSet, value: i64) -> Self {
        Self { attributes, value }
    }

    /// Value of one attribute.
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub name: String,
    pub description: String,
    pub kind: MetricKind,
    pub temporality: Temporality,
    pub data_points: Vec<DataPoint>,
}

impl Metric {
    pub fn sum(name: &str, description: &str, monotonic: bool) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            kind: MetricKind::Sum { monotonic },
            temporality: Temporality::Cumulative,
            data_points: Vec::new(),
        }
    }

    pub fn gauge(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            kind: MetricKind::Gauge,
            temporality: Temporality::Cumulative,
            data_points: Vec::new(),
        }
    }

    pub fn push(&mut self, attributes: AttributeSet, value: i64) {
        self.data_points.push(DataPoint::new(attributes, value));
    }

    /// First point whose attributes contain every given pair.
    pub fn point(&self, filter: &[(&str, &str)]) -> Option<&DataPoint> {
        self.data_points.iter().find(|p| {
            filter.iter().all(|(k, v)| {
                matches!(p.attributes.get(*k), Some(AttributeValue::String(s)) if s == v)
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeMetrics {
    pub scope: String,
    pub metrics: Vec<Metric>,
}

/// One collection cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceMetrics {
    pub resource: AttributeSet,
    pub scope_metrics: Vec<ScopeMetrics>,
}

impl ResourceMetrics {
    pub fn total_metrics(&self) -> usize {
        self.scope_metrics.iter().map(|s| s.metrics.len()).sum()
    }

    /// Find a metric by name in any scope.
    pub fn find(&self, name: &str) -> Option<&Metric> {
        self.metrics().find(|m| m.name == name)
    }

    pub fn metrics(&self) -> impl Iterator<Item = &Metric> {
        self.scope_metrics.iter().flat_map(|s| s.metrics.iter())
    }
}

/// Build an attribute set from string pairs.
pub fn attributes<'a>(pairs: impl IntoIterator<Item = (&'a str, AttributeValue)>) -> AttributeSet {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}
