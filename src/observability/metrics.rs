//! Prometheus exposition.
//!
//! # Responsibilities
//! - Install the global `metrics` recorder backed by Prometheus
//! - Serve the scrape endpoint on `telemetry.metrics.prometheus.listen_addr`
//! - Expire series that the telemetry emitter stopped rendering
//!
//! # Metrics
//! Everything the telemetry emitter renders, forwarded by
//! `telemetry::PrometheusExporter`. Dots in names and attribute keys become
//! underscores (`router.graphql.cache.cost.max` → `router_graphql_cache_cost_max`).
//!
//! # Design Decisions
//! - The recorder is process global; only the binary installs it
//! - Tests build a local recorder from the same builder
//! - Live series are rewritten every export cycle, so a series untouched for a
//!   few cycles belongs to an evicted config version and is dropped

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use metrics_util::MetricKindMask;
use parking_lot::Mutex;

/// Export cycles a series may miss before it disappears from the scrape.
const IDLE_CYCLES: u32 = 3;

/// How long a series may go without an update before it is dropped.
pub fn series_idle_timeout(export_interval: Duration) -> Duration {
    export_interval.saturating_mul(IDLE_CYCLES)
}

/// Builder shared by the installed recorder and tests.
pub fn prometheus_builder(export_interval: Duration) -> PrometheusBuilder {
    let idle = series_idle_timeout(export_interval);
    PrometheusBuilder::new().idle_timeout(MetricKindMask::ALL, Some(idle))
}

/// Install the recorder and start the scrape listener. Needs a Tokio runtime.
pub fn init_prometheus(addr: SocketAddr, export_interval: Duration) -> Result<(), BuildError> {
    prometheus_builder(export_interval).with_http_listener(addr).install()?;
    tracing::info!(
        address = %addr,
        idle_timeout = ?series_idle_timeout(export_interval),
        "Prometheus endpoint listening"
    );
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct Installed {
    addr: SocketAddr,
    export_interval: Duration,
}

/// The process scrape endpoint, installed the first time a config enables it.
///
/// The recorder cannot be replaced once installed: later listen address or
/// interval changes are logged and need a restart.
#[derive(Debug, Default)]
pub struct PrometheusEndpoint {
    installed: Mutex<Option<Installed>>,
}

impl PrometheusEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.installed.lock().map(|i| i.addr)
    }

    pub fn ensure(&self, addr: SocketAddr, export_interval: Duration) -> Result<(), BuildError> {
        let mut installed = self.installed.lock();
        match *installed {
            None => {
                init_prometheus(addr, export_interval)?;
                *installed = Some(Installed { addr, export_interval });
            }
            Some(current) => {
                if current.addr != addr {
                    tracing::warn!(
                        current = %current.addr,
                        requested = %addr,
                        "Prometheus listen address changed, restart to apply"
                    );
                }
                if export_interval > current.export_interval {
                    tracing::warn!(
                        idle_timeout = ?series_idle_timeout(current.export_interval),
                        export_interval = ?export_interval,
                        "Export interval grew past the installed idle timeout, restart to apply"
                    );
                }
            }
        }
        Ok(())
    }
}
