//! Debug export.
//!
//! Wraps a production exporter and logs every metric around each flush.
//! What the wrapped exporter receives is never changed.

use std::time::Instant;

use regex::Regex;
use serde::Serialize;

use crate::telemetry::exporter::{ExportError, MetricExporter};
use crate::telemetry::filter::{compile_patterns, FilterError};
use crate::telemetry::model::{DataPoint, ResourceMetrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Before,
    After,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Before => "before",
            Phase::After => "after",
        }
    }
}

/// One logged metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDescription {
    pub name: String,
    pub kind: &'static str,
    pub temporality: &'static str,
    pub monotonic: bool,
    pub data_points: Vec<DataPoint>,
}

pub struct DebugExporter<E> {
    inner: E,
    exclude_metrics: Vec<Regex>,
}

impl<E: MetricExporter> DebugExporter<E> {
    pub fn new(inner: E, exclude_metrics: &[String]) -> Result<Self, FilterError> {
        Ok(Self {
            inner,
            exclude_metrics: compile_patterns(exclude_metrics)?,
        })
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Metrics that would be logged for this cycle.
    pub fn describe(&self, resource: &ResourceMetrics) -> Vec<MetricDescription> {
        resource
            .metrics()
            .filter(|m| !self.exclude_metrics.iter().any(|re| re.is_match(&m.name)))
            .map(|m| MetricDescription {
                name: m.name.clone(),
                kind: m.kind.type_name(),
                temporality: m.temporality.as_str(),
                monotonic: m.kind.is_monotonic(),
                data_points: m.data_points.clone(),
            })
            .collect()
    }

    fn log_metrics(&self, resource: &ResourceMetrics, phase: Phase) {
        for metric in self.describe(resource) {
            let data_points = serde_json::to_string(&metric.data_points).unwrap_or_default();
            tracing::info!(
                name = %metric.name,
                metric_type = metric.kind,
                temporality = metric.temporality,
                monotonic = metric.monotonic,
                data_points = %data_points,
                phase = phase.as_str(),
                "Metric"
            );
        }
    }
}

impl<E: MetricExporter> MetricExporter for DebugExporter<E> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn export(&self, resource: &ResourceMetrics) -> Result<(), ExportError> {
        let resource_attrs = serde_json::to_string(&resource.resource).unwrap_or_default();
        tracing::info!(
            exporter = self.inner.name(),
            resource = %resource_attrs,
            scope_metrics = resource.scope_metrics.len(),
            total_metrics = resource.total_metrics(),
            "Starting metric export"
        );
        self.log_metrics(resource, Phase::Before);

        let start = Instant::now();
        let result = self.inner.export(resource);
        let duration = start.elapsed();

        self.log_metrics(resource, Phase::After);
        match &result {
            Ok(()) => {
                tracing::info!(exporter = self.inner.name(), ?duration, "Metric export succeeded")
            }
            Err(err) => tracing::error!(
                exporter = self.inner.name(),
                ?duration,
                error = %err,
                "Metric export failed"
            ),
        }
        result
    }
}

impl<E> std::fmt::Debug for DebugExporter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugExporter")
            .field("exclude_metrics", &self.exclude_metrics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::exporter::InMemoryExporter;
    use crate::telemetry::model::{AttributeSet, Metric, ScopeMetrics};

    fn resource() -> ResourceMetrics {
        let mut max = Metric::gauge("router.graphql.cache.cost.max", "");
        max.push(AttributeSet::new(), 1024);
        let mut requests = Metric::sum("router.http.requests", "", true);
        requests.push(AttributeSet::new(), 2);
        ResourceMetrics {
            resource: AttributeSet::new(),
            scope_metrics: vec![ScopeMetrics {
                scope: "router.cache".into(),
                metrics: vec![max, requests],
            }],
        }
    }

    #[test]
    fn describe_honours_its_own_exclusions() {
        let exclude = ["^router\\.graphql\\.".to_string()];
        let exporter = DebugExporter::new(InMemoryExporter::new(), &exclude).unwrap();
        let described = exporter.describe(&resource());
        assert_eq!(described.len(), 1);
        assert_eq!(described[0].name, "router.http.requests");
        assert_eq!(described[0].kind, "Sum[int64]");
        assert_eq!(described[0].temporality, "CumulativeTemporality");
        assert!(described[0].monotonic);
    }

    #[test]
    fn export_is_unchanged() {
        let exporter = DebugExporter::new(InMemoryExporter::new(), &[".*".into()]).unwrap();
        exporter.export(&resource()).unwrap();
        assert_eq!(exporter.inner().last(), Some(resource()));
    }

    #[test]
    fn failures_are_passed_through() {
        let exporter = DebugExporter::new(InMemoryExporter::new(), &[]).unwrap();
        exporter.inner().set_failing(true);
        assert!(exporter.export(&resource()).is_err());
    }

    #[test]
    fn invalid_pattern_fails() {
        assert!(DebugExporter::new(InMemoryExporter::new(), &["[".into()]).is_err());
    }
}
