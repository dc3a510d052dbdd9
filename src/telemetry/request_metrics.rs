//! Request counters.
//!
//! `router.http.requests` and `router.http.requests.error`, counted per
//! operation (router scope) and per subgraph fetch (subgraph scope). Series
//! are keyed by their config version and full attribute set; series of a
//! config version that was reloaded away are dropped with its namespaces.

use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;

use crate::telemetry::attributes::{insert_str, keys};
use crate::telemetry::context::{RequestContext, SubgraphContext};
use crate::telemetry::model::{AttributeSet, Metric, HTTP_REQUESTS, HTTP_REQUESTS_ERROR};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    metric: &'static str,
    config_version: String,
    attributes: AttributeSet,
}

#[derive(Debug, Default)]
pub struct RequestMetricStore {
    series: DashMap<SeriesKey, AtomicI64>,
}

impl RequestMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request, and one error if it failed.
    pub fn record(&self, config_version: &str, attributes: AttributeSet, failed: bool) {
        if failed {
            self.add(HTTP_REQUESTS_ERROR, config_version, attributes.clone(), 1);
        }
        self.add(HTTP_REQUESTS, config_version, attributes, 1);
    }

    fn add(
        &self,
        metric: &'static str,
        config_version: &str,
        attributes: AttributeSet,
        delta: i64,
    ) {
        let key = SeriesKey {
            metric,
            config_version: config_version.to_string(),
            attributes,
        };
        if let Some(counter) = self.series.get(&key) {
            counter.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        self.series
            .entry(key)
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    /// Render both metrics. Metrics without points are left out.
    pub fn collect(&self) -> Vec<Metric> {
        let mut requests = Metric::sum(HTTP_REQUESTS, "Total number of requests", true);
        let mut errors = Metric::sum(HTTP_REQUESTS_ERROR, "Total number of failed requests", true);

        let mut series: Vec<_> = self
            .series
            .iter()
            .map(|r| (r.key().clone(), r.value().load(Ordering::Relaxed)))
            .collect();
        series.sort_by(|(a, _), (b, _)| a.attributes.cmp(&b.attributes));

        for (key, value) in series {
            match key.metric {
                HTTP_REQUESTS_ERROR => errors.push(key.attributes, value),
                _ => requests.push(key.attributes, value),
            }
        }

        [requests, errors]
            .into_iter()
            .filter(|m| !m.data_points.is_empty())
            .collect()
    }

    /// Drop every series not recorded under `config_version`.
    pub fn retain_config_version(&self, config_version: &str) -> usize {
        let before = self.series.len();
        self.series.retain(|key, _| key.config_version == config_version);
        before - self.series.len()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// Well-known attributes of a request-level point.
pub fn operation_attributes(request: &RequestContext) -> AttributeSet {
    let mut set = AttributeSet::new();
    let operation = &request.operation;
    insert_str(&mut set, keys::OPERATION_NAME, operation.name.as_deref().unwrap_or_default());
    if let Some(kind) = operation.operation_type {
        insert_str(&mut set, keys::OPERATION_TYPE, kind.as_str());
    }
    let persisted_id = operation.persisted_id.as_deref().unwrap_or_default();
    insert_str(&mut set, keys::OPERATION_HASH, operation.hash.as_deref().unwrap_or_default());
    insert_str(&mut set, keys::OPERATION_PERSISTED_ID, persisted_id);
    insert_str(&mut set, keys::OPERATION_PROTOCOL, "http");
    insert_str(&mut set, keys::CLIENT_NAME, &request.client.name);
    insert_str(&mut set, keys::CLIENT_VERSION, &request.client.version);
    set
}

/// Well-known attributes of a subgraph fetch point.
pub fn subgraph_attributes(request: &RequestContext, subgraph: &SubgraphContext) -> AttributeSet {
    let mut set = operation_attributes(request);
    insert_str(&mut set, keys::SUBGRAPH_NAME, &subgraph.name);
    insert_str(&mut set, keys::SUBGRAPH_ID, &subgraph.id);
    set
}
