//! Federation router
//!
//! Operation caching, engine statistics and metric export around a GraphQL
//! execution engine.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────┐
//!                 │                    FEDERATION ROUTER                      │
//!                 │                                                           │
//!   Operation     │  ┌──────────┐    ┌─────────────┐    ┌────────────────┐   │
//!   ──────────────┼─▶│lifecycle │───▶│  pipeline   │───▶│ GraphqlEngine  │   │
//!                 │  │ instance │    │ (per ns)    │    │ (external)     │   │
//!                 │  └────┬─────┘    └──────┬──────┘    └────────────────┘   │
//!                 │       │                 │                                 │
//!                 │       │                 ▼                                 │
//!                 │       │          ┌─────────────┐                          │
//!                 │       │          │    cache    │ namespaces per config    │
//!                 │       │          │  + stats    │ version / feature flag   │
//!                 │       │          └──────┬──────┘                          │
//!   Subscriptions │       ▼                 │                                 │
//!   ──────────────┼─▶┌──────────┐           ▼                                 │
//!                 │  │statistics│──▶┌─────────────┐   ┌──────────────────┐    │
//!                 │  │ tracker  │   │  telemetry  │──▶│ Prometheus / log │    │
//!                 │  └──────────┘   │  emitter    │   └──────────────────┘    │
//!                 │                 └─────────────┘                           │
//!                 │  config (TOML + watcher)   admin API   observability      │
//!                 └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use federation_router::admin;
use federation_router::config::{
    load_config, validate_config, ConfigError, ConfigWatcher, RouterConfig,
};
use federation_router::lifecycle::{next_signal, watch_config, RouterInstance, Shutdown, Signal};
use federation_router::observability::logging;
use federation_router::observability::metrics::PrometheusEndpoint;
use federation_router::pipeline::PassthroughEngine;

#[derive(Parser)]
#[command(name = "federation-router", version, about = "GraphQL federation router")]
struct Cli {
    /// Path to the TOML config. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn initial_config(path: Option<&PathBuf>) -> Result<RouterConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => {
            let config = RouterConfig::default();
            validate_config(&config).map_err(ConfigError::Validation)?;
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = initial_config(cli.config.as_ref())?;

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "federation-router starting");

    let router = RouterInstance::build_with_prometheus(
        config.clone(),
        Arc::new(PassthroughEngine::new()),
        PrometheusEndpoint::new(),
    )?;
    let shutdown = Shutdown::new();
    let mut tasks = Vec::new();

    // Metric export; exporters and interval follow reloads
    tasks.push(tokio::spawn(router.reader().clone().run(shutdown.subscribe())));

    // Hot reload
    let _watcher = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            tasks.push(tokio::spawn(watch_config(router.clone(), updates, shutdown.subscribe())));
            Some(watcher.run()?)
        }
        None => None,
    };

    if config.admin.enabled {
        let addr = config.admin.bind_address.parse()?;
        let admin_router = router.clone();
        let rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = admin::serve(admin_router, addr, rx).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        }));
    }

    loop {
        match next_signal().await? {
            Signal::Reload => match &cli.config {
                Some(path) => match load_config(path).map(|c| router.apply_config(c)) {
                    Ok(Ok(outcome)) => tracing::info!(
                        config_version = %outcome.config_version,
                        "Reloaded on SIGHUP"
                    ),
                    Ok(Err(e)) => tracing::error!(error = %e, "Reload rejected"),
                    Err(e) => tracing::error!(error = %e, "Reload rejected"),
                },
                None => tracing::warn!("SIGHUP ignored, no config file"),
            },
            Signal::Terminate => break,
        }
    }

    tracing::info!(tasks = shutdown.receiver_count(), "Shutting down");
    shutdown.trigger();
    let drain = futures_util::future::join_all(tasks);
    if tokio::time::timeout(Duration::from_secs(10), drain).await.is_err() {
        tracing::warn!("Shutdown deadline reached, exiting");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
