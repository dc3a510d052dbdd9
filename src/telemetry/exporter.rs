//! Metric exporters.
//!
//! An exporter receives one `ResourceMetrics` per collection cycle. The
//! Prometheus exporter forwards the cycle to the `metrics` facade, where the
//! installed Prometheus recorder serves it on its scrape endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use metrics::Label;
use parking_lot::Mutex;

use crate::telemetry::model::{DataPoint, Metric, MetricKind, ResourceMetrics};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("exporter {exporter} failed: {reason}")]
    Failed { exporter: &'static str, reason: String },
}

pub trait MetricExporter: Send + Sync {
    fn name(&self) -> &'static str;

    fn export(&self, resource: &ResourceMetrics) -> Result<(), ExportError>;
}

impl<T: MetricExporter + ?Sized> MetricExporter for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn export(&self, resource: &ResourceMetrics) -> Result<(), ExportError> {
        (**self).export(resource)
    }
}

/// Keeps every exported cycle. Used by the admin API and tests.
#[derive(Debug, Default)]
pub struct InMemoryExporter {
    exports: Mutex<Vec<ResourceMetrics>>,
    failing: AtomicBool,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent exports fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn exports(&self) -> Vec<ResourceMetrics> {
        self.exports.lock().clone()
    }

    pub fn last(&self) -> Option<ResourceMetrics> {
        self.exports.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.exports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetricExporter for InMemoryExporter {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    fn export(&self, resource: &ResourceMetrics) -> Result<(), ExportError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(ExportError::Failed {
                exporter: self.name(),
                reason: "export disabled".into(),
            });
        }
        self.exports.lock().push(resource.clone());
        Ok(())
    }
}

/// Accepts and drops every cycle. Debug export wraps it when no production
/// exporter is configured, so the log still sees each flush.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MetricExporter for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn export(&self, _resource: &ResourceMetrics) -> Result<(), ExportError> {
        Ok(())
    }
}

/// Forwards cycles to the `metrics` facade.
///
/// Monotonic sums become counters set to their absolute value. Gauges and
/// non-monotonic sums become gauges. Every live series is written on every
/// cycle; series that stop arriving expire through the recorder's idle
/// timeout (see `observability::metrics`).
#[derive(Debug, Default)]
pub struct PrometheusExporter;

impl PrometheusExporter {
    pub fn new() -> Self {
        Self
    }

    fn record(metric: &Metric, point: &DataPoint) {
        let labels: Vec<Label> = point
            .attributes
            .iter()
            .map(|(key, value)| Label::new(key.clone(), value.to_string()))
            .collect();

        match metric.kind {
            MetricKind::Sum { monotonic: true } => {
                metrics::counter!(metric.name.clone(), labels).absolute(point.value.max(0) as u64);
            }
            MetricKind::Sum { monotonic: false } | MetricKind::Gauge => {
                metrics::gauge!(metric.name.clone(), labels).set(point.value as f64);
            }
        }
    }
}

impl MetricExporter for PrometheusExporter {
    fn name(&self) -> &'static str {
        "prometheus"
    }

    fn export(&self, resource: &ResourceMetrics) -> Result<(), ExportError> {
        for metric in resource.metrics() {
            for point in &metric.data_points {
                Self::record(metric, point);
            }
        }
        Ok(())
    }
}
