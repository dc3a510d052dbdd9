//! Cardinality control.
//!
//! Two independent exclusions applied before export: whole metrics whose
//! name matches, and attribute keys that are stripped from every surviving
//! point. Points that become identical after stripping are merged.

use std::collections::HashMap;

use regex::Regex;

use crate::telemetry::model::{AttributeSet, DataPoint, Metric, MetricKind, ResourceMetrics};

#[derive(Debug, thiserror::Error)]
#[error("invalid pattern {pattern:?}: {source}")]
pub struct FilterError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// Compile a list of patterns, reporting the first invalid one.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, FilterError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| FilterError {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct MetricFilter {
    exclude_metrics: Vec<Regex>,
    exclude_labels: Vec<Regex>,
}

impl MetricFilter {
    pub fn new(exclude_metrics: &[String], exclude_labels: &[String]) -> Result<Self, FilterError> {
        Ok(Self {
            exclude_metrics: compile_patterns(exclude_metrics)?,
            exclude_labels: compile_patterns(exclude_labels)?,
        })
    }

    pub fn is_noop(&self) -> bool {
        self.exclude_metrics.is_empty() && self.exclude_labels.is_empty()
    }

    pub fn excludes_metric(&self, name: &str) -> bool {
        self.exclude_metrics.iter().any(|re| re.is_match(name))
    }

    fn excludes_label(&self, key: &str) -> bool {
        self.exclude_labels.iter().any(|re| re.is_match(key))
    }

    /// Apply both exclusions in place.
    pub fn apply(&self, resource: &mut ResourceMetrics) {
        if self.is_noop() {
            return;
        }
        for scope in &mut resource.scope_metrics {
            scope.metrics.retain(|m| !self.excludes_metric(&m.name));
            if self.exclude_labels.is_empty() {
                continue;
            }
            for metric in &mut scope.metrics {
                self.strip_labels(metric);
            }
        }
        resource.scope_metrics.retain(|s| !s.metrics.is_empty());
    }

    fn strip_labels(&self, metric: &mut Metric) {
        let mut merged: Vec<DataPoint> = Vec::with_capacity(metric.data_points.len());
        let mut index: HashMap<AttributeSet, usize> = HashMap::new();

        for mut point in metric.data_points.drain(..) {
            point.attributes.retain(|key, _| !self.excludes_label(key));
            match index.get(&point.attributes) {
                Some(&i) => match metric.kind {
                    MetricKind::Sum { .. } => merged[i].value += point.value,
                    MetricKind::Gauge => merged[i].value = point.value,
                },
                None => {
                    index.insert(point.attributes.clone(), merged.len());
                    merged.push(point);
                }
            }
        }
        metric.data_points = merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::model::{attributes, AttributeValue, ScopeMetrics};

    fn resource() -> ResourceMetrics {
        let mut requests = Metric::sum("router.http.requests", "", true);
        requests.push(
            attributes([
                ("wg.client.name", AttributeValue::from("web")),
                ("wg.operation.name", AttributeValue::from("A")),
            ]),
            2,
        );
        requests.push(
            attributes([
                ("wg.client.name", AttributeValue::from("ios")),
                ("wg.operation.name", AttributeValue::from("A")),
            ]),
            3,
        );
        let mut max = Metric::gauge("router.graphql.cache.cost.max", "");
        max.push(attributes([("cache_type", AttributeValue::from("plan"))]), 1024);

        ResourceMetrics {
            resource: AttributeSet::new(),
            scope_metrics: vec![ScopeMetrics {
                scope: "router.request".into(),
                metrics: vec![requests, max],
            }],
        }
    }

    #[test]
    fn strips_labels_and_merges_points() {
        let filter = MetricFilter::new(&[], &[r"wg\.client\.name".into()]).unwrap();
        let mut resource = resource();
        filter.apply(&mut resource);

        let requests = resource.find("router.http.requests").unwrap();
        assert_eq!(requests.data_points.len(), 1);
        assert_eq!(requests.data_points[0].value, 5);
        assert!(requests.data_points[0].attribute("wg.client.name").is_none());
        assert!(requests.data_points[0].attribute("wg.operation.name").is_some());
    }

    #[test]
    fn drops_excluded_metrics() {
        let filter = MetricFilter::new(&["^router\\.graphql\\.cache\\..*".into()], &[]).unwrap();
        let mut resource = resource();
        filter.apply(&mut resource);
        assert!(resource.find("router.graphql.cache.cost.max").is_none());
        assert!(resource.find("router.http.requests").is_some());
    }

    #[test]
    fn empty_scopes_are_removed() {
        let filter = MetricFilter::new(&[".*".into()], &[]).unwrap();
        let mut resource = resource();
        filter.apply(&mut resource);
        assert_eq!(resource.total_metrics(), 0);
        assert!(resource.scope_metrics.is_empty());
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let err = MetricFilter::new(&["(".into()], &[]).unwrap_err();
        assert_eq!(err.pattern, "(");
    }
}
