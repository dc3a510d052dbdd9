//! Admin API.
//!
//! Read-only views of the running instance: engine statistics, cache
//! counters per namespace and the metrics of the next export. Every route
//! requires the configured bearer token.

pub mod auth;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::lifecycle::RouterInstance;

#[derive(Clone)]
pub struct AdminState {
    pub router: Arc<RouterInstance>,
}

pub fn setup_admin_router(router: Arc<RouterInstance>) -> Router {
    let state = AdminState { router };
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/engine", get(get_engine))
        .route("/admin/cache", get(get_cache))
        .route("/admin/metrics", get(get_metrics))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until shutdown.
pub async fn serve(
    router: Arc<RouterInstance>,
    addr: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");
    axum::serve(listener, setup_admin_router(router))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
