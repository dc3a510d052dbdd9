//! Periodic metric reader.
//!
//! Collects from the emitter on a fixed interval and hands the cycle to every
//! exporter. A failing exporter is logged and skipped; counters keep
//! accumulating for the next cycle.
//!
//! The reader runs for the life of the router. Exporters and the interval are
//! replaced on config reload, and each cycle checks the live `enabled` switch,
//! so metrics turned on by a reload resume with cumulative totals.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::broadcast;

use crate::config::schema::MetricsConfig;
use crate::telemetry::debug_export::DebugExporter;
use crate::telemetry::emitter::TelemetryEmitter;
use crate::telemetry::exporter::{LogSink, MetricExporter, PrometheusExporter};
use crate::telemetry::filter::FilterError;

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub exported: usize,
    pub failed: usize,
}

/// Exporters selected by a metrics config.
///
/// Debug export wraps Prometheus when both are on, and a log-only sink when
/// Prometheus is off.
pub fn exporters_for(
    metrics: &MetricsConfig,
) -> Result<Vec<Arc<dyn MetricExporter>>, FilterError> {
    let exclude = &metrics.debug_export.exclude_metrics;
    let exporter: Arc<dyn MetricExporter> =
        match (metrics.prometheus.enabled, metrics.debug_export.enabled) {
            (true, true) => Arc::new(DebugExporter::new(PrometheusExporter::new(), exclude)?),
            (true, false) => Arc::new(PrometheusExporter::new()),
            (false, true) => Arc::new(DebugExporter::new(LogSink, exclude)?),
            (false, false) => return Ok(Vec::new()),
        };
    Ok(vec![exporter])
}

pub struct PeriodicReader {
    emitter: Arc<TelemetryEmitter>,
    exporters: ArcSwap<Vec<Arc<dyn MetricExporter>>>,
    interval_ms: AtomicU64,
}

impl PeriodicReader {
    pub fn new(emitter: Arc<TelemetryEmitter>, interval: Duration) -> Self {
        Self {
            emitter,
            exporters: ArcSwap::from_pointee(Vec::new()),
            interval_ms: AtomicU64::new(duration_ms(interval)),
        }
    }

    pub fn with_exporter(self, exporter: impl MetricExporter + 'static) -> Self {
        let mut exporters = self.exporters.load_full().as_ref().clone();
        exporters.push(Arc::new(exporter));
        self.exporters.store(Arc::new(exporters));
        self
    }

    /// Replace exporters and interval from a metrics config.
    pub fn reconfigure(&self, metrics: &MetricsConfig) -> Result<(), FilterError> {
        let exporters = exporters_for(metrics)?;
        let interval = Duration::from_secs(metrics.export_interval_secs);
        tracing::info!(
            enabled = metrics.enabled,
            interval = ?interval,
            exporters = ?exporters.iter().map(|e| e.name()).collect::<Vec<_>>(),
            "Metric reader reconfigured"
        );
        self.set_exporters(exporters);
        self.set_interval(interval);
        Ok(())
    }

    pub fn set_exporters(&self, exporters: Vec<Arc<dyn MetricExporter>>) {
        self.exporters.store(Arc::new(exporters));
    }

    /// Takes effect from the next cycle.
    pub fn set_interval(&self, interval: Duration) {
        self.interval_ms.store(duration_ms(interval), Ordering::Relaxed);
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    pub fn exporter_count(&self) -> usize {
        self.exporters.load().len()
    }

    pub fn exporter_names(&self) -> Vec<&'static str> {
        self.exporters.load().iter().map(|e| e.name()).collect()
    }

    /// Collect once and export to every exporter.
    pub fn force_flush(&self) -> FlushReport {
        let mut report = FlushReport::default();
        let exporters = self.exporters.load_full();
        if !self.emitter.settings().enabled || exporters.is_empty() {
            return report;
        }

        let resource = self.emitter.collect();
        for exporter in exporters.iter() {
            match exporter.export(&resource) {
                Ok(()) => report.exported += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        exporter = exporter.name(),
                        error = %err,
                        "Metric export failed"
                    );
                }
            }
        }
        report
    }

    /// Flush every interval until shutdown, then flush once more.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval = ?self.interval(),
            exporters = self.exporter_count(),
            "Metric reader started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval()) => {
                    let report = self.force_flush();
                    tracing::trace!(
                        exported = report.exported,
                        failed = report.failed,
                        "Metric flush"
                    );
                }
                _ = shutdown.recv() => {
                    tracing::info!("Metric reader shutting down");
                    self.force_flush();
                    break;
                }
            }
        }
    }
}

fn duration_ms(interval: Duration) -> u64 {
    u64::try_from(interval.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl std::fmt::Debug for PeriodicReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicReader")
            .field("interval", &self.interval())
            .field("exporters", &self.exporter_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKind, CacheStatsRecorder, NamespaceId};
    use crate::statistics::EngineStatisticsTracker;
    use crate::telemetry::attributes::RouterIdentity;
    use crate::telemetry::emitter::EmitterSettings;
    use crate::telemetry::exporter::InMemoryExporter;

    fn emitter(enabled: bool) -> Arc<TelemetryEmitter> {
        let recorder = Arc::new(CacheStatsRecorder::new());
        recorder.register(CacheKind::Plan, &NamespaceId::main("1"), 100);
        Arc::new(TelemetryEmitter::new(
            RouterIdentity::new("c", "g"),
            EmitterSettings {
                enabled,
                graphql_cache: true,
                config_version: "1".into(),
                ..EmitterSettings::default()
            },
            recorder,
            Arc::new(EngineStatisticsTracker::new()),
        ))
    }

    #[test]
    fn force_flush_reports_failures_per_exporter() {
        let good = Arc::new(InMemoryExporter::new());
        let bad = Arc::new(InMemoryExporter::new());
        bad.set_failing(true);
        let reader = PeriodicReader::new(emitter(true), Duration::from_secs(60))
            .with_exporter(good.clone())
            .with_exporter(bad.clone());

        let report = reader.force_flush();
        assert_eq!(report, FlushReport { exported: 1, failed: 1 });
        assert_eq!(good.len(), 1);
        assert!(bad.is_empty());
    }

    #[test]
    fn disabled_metrics_skip_export() {
        let sink = Arc::new(InMemoryExporter::new());
        let reader = PeriodicReader::new(emitter(false), Duration::from_secs(60))
            .with_exporter(sink.clone());
        assert_eq!(reader.force_flush(), FlushReport::default());
        assert!(sink.is_empty());
    }

    #[test]
    fn exporters_follow_the_metrics_config() {
        let mut metrics = MetricsConfig::default();
        assert!(exporters_for(&metrics).unwrap().is_empty());

        metrics.debug_export.enabled = true;
        let names: Vec<_> = exporters_for(&metrics).unwrap().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["log"]);

        metrics.prometheus.enabled = true;
        let names: Vec<_> = exporters_for(&metrics).unwrap().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["prometheus"]);

        metrics.debug_export.exclude_metrics = vec!["(".into()];
        assert!(exporters_for(&metrics).is_err());
    }

    #[test]
    fn reconfigure_swaps_exporters_and_interval() {
        let reader = PeriodicReader::new(emitter(true), Duration::from_secs(60));
        assert_eq!(reader.force_flush(), FlushReport::default());

        let mut metrics = MetricsConfig::default();
        metrics.export_interval_secs = 5;
        metrics.debug_export.enabled = true;
        reader.reconfigure(&metrics).unwrap();

        assert_eq!(reader.interval(), Duration::from_secs(5));
        assert_eq!(reader.exporter_names(), vec!["log"]);
        assert_eq!(reader.force_flush(), FlushReport { exported: 1, failed: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn exports_on_interval_and_on_shutdown() {
        let sink = Arc::new(InMemoryExporter::new());
        let reader = Arc::new(
            PeriodicReader::new(emitter(true), Duration::from_secs(15)).with_exporter(sink.clone()),
        );
        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(reader.clone().run(rx));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(sink.len(), 2);

        // The pending 15s wait finishes at 45s, then cycles run every 5s.
        reader.set_interval(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(sink.len(), 4);

        tx.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(sink.len(), 5);
    }
}
