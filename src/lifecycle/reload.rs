//! Hot reload.
//!
//! A new config version gets fresh cache namespaces; the previous version's
//! namespaces are dropped as a unit once the new pipelines are live. Requests
//! already holding an old pipeline finish against the old caches.
//!
//! Metric export follows the new config too: the reader gets fresh exporters
//! and interval, and request series of dropped versions are forgotten.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::config::schema::RouterConfig;
use crate::lifecycle::startup::{
    build_pipelines, ensure_endpoint, CompiledConfig, RouterInstance, StartupError,
};
use crate::telemetry::emitter::TelemetryError;

/// What a reload changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadOutcome {
    pub previous_version: String,
    pub config_version: String,
    /// Namespaces dropped with the previous version.
    pub evicted_namespaces: usize,
    /// Request metric series dropped with the previous version.
    pub evicted_series: usize,
}

impl ReloadOutcome {
    pub fn version_changed(&self) -> bool {
        self.previous_version != self.config_version
    }
}

impl RouterInstance {
    /// Swap in a new config. An invalid config leaves the router untouched.
    pub fn apply_config(&self, config: RouterConfig) -> Result<ReloadOutcome, StartupError> {
        let compiled = CompiledConfig::compile(&config)?;
        ensure_endpoint(self.prometheus.as_ref(), &config)?;
        self.reader
            .reconfigure(&config.telemetry.metrics)
            .map_err(TelemetryError::from)?;
        let previous_version = self.config_version();
        let config_version = config.router.config_version.clone();

        let pipelines =
            build_pipelines(&config, &self.engine, &self.registry, compiled.compute_sha256);
        self.pipelines.store(Arc::new(pipelines));
        self.tracing_attributes.store(Arc::new(compiled.tracing_attributes));
        self.emitter.reconfigure(compiled.emitter);
        self.config.store(Arc::new(config));

        let evicted_namespaces = self.registry.evict_except(&config_version);
        let evicted_series = self.emitter.retain_config_version(&config_version);

        tracing::info!(
            previous_version = %previous_version,
            config_version = %config_version,
            evicted_namespaces,
            evicted_series,
            "Router config reloaded"
        );
        Ok(ReloadOutcome {
            previous_version,
            config_version,
            evicted_namespaces,
            evicted_series,
        })
    }
}

/// Apply configs from the watcher until shutdown.
pub async fn watch_config(
    router: Arc<RouterInstance>,
    mut updates: mpsc::UnboundedReceiver<RouterConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(config) = update else { break };
                if let Err(e) = router.apply_config(config) {
                    tracing::error!(
                        error = %e,
                        "Rejected config reload, keeping current configuration"
                    );
                }
            }
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("Config reload task stopped");
}
