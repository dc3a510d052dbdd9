use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::cache::namespace::NamespaceId;
use crate::cache::stats::CounterValues;
use crate::cache::CacheKind;
use crate::statistics::EngineSnapshot;
use crate::telemetry::model::ResourceMetrics;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub config_version: String,
    pub instance_id: String,
    pub namespaces: usize,
}

#[derive(Debug, Serialize)]
pub struct CacheStatus {
    pub namespace: NamespaceId,
    pub cache_type: CacheKind,
    pub entries: u64,
    pub cost: i64,
    pub counters: CounterValues,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let router = &state.router;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        config_version: router.config_version(),
        instance_id: router.emitter().instance_id().to_string(),
        namespaces: router.registry().len(),
    })
}

pub async fn get_engine(State(state): State<AdminState>) -> Json<EngineSnapshot> {
    Json(state.router.statistics().snapshot())
}

pub async fn get_cache(State(state): State<AdminState>) -> Json<Vec<CacheStatus>> {
    let router = &state.router;
    let recorder = router.cache_stats();
    let mut caches = Vec::new();
    for namespace in router.registry().namespaces() {
        for kind in CacheKind::ALL {
            if let Some(counters) = recorder.counters(kind, &namespace) {
                let values = counters.values();
                caches.push(CacheStatus {
                    namespace: namespace.clone(),
                    cache_type: kind,
                    entries: values.current_entries(),
                    cost: values.current_cost(),
                    counters: values,
                });
            }
        }
    }
    Json(caches)
}

/// The metrics the next export would carry.
pub async fn get_metrics(State(state): State<AdminState>) -> Json<ResourceMetrics> {
    Json(state.router.emitter().collect())
}
