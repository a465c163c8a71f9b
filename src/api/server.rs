//! Axum HTTP/SSE surface (C10, spec.md §9).
//!
//! The transport framing in §6.4 is explicitly out of scope; this module is
//! the minimal concrete adapter the ambient stack still needs. Router
//! layout modeled on the teacher's `api::server::ApiServer` (`axum::Router`
//! + `tower_http::cors::CorsLayer` + `tower_http` tracing).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::auth::AuthTable;
use crate::api::handlers;
use crate::broker::Broker;
use crate::monitoring::Metrics;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub listen_addr: SocketAddr,
    pub request_timeout: Duration,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".parse().unwrap(),
            request_timeout: Duration::from_secs(30),
            cors_allowed_origins: vec!["*".to_string()],
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub metrics: Arc<Metrics>,
    pub auth: Arc<AuthTable>,
}

impl FromRef<AppState> for AuthTable {
    fn from_ref(state: &AppState) -> Self {
        (*state.auth).clone()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/jobs", post(handlers::submit))
        .route("/jobs/:id", get(handlers::query))
        .route("/jobs/:id", delete(handlers::cancel))
        .route("/jobs/:id/events", get(handlers::events))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: ApiConfig, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    info!(addr = %config.listen_addr, "starting HTTP server");
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
