//! Read-only HTTP surface over the dashboard state.
//!
//! The web dashboard polls this API for the current counts, the progress
//! gauge and the status log; nothing here mutates the pipeline.

use crate::config::DashboardConfig;
use crate::state::{CowCounts, DashboardState, StatusEntry};
use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct ApiState {
    pub dashboard: Arc<DashboardState>,
}

/// Query parameters for the status endpoint.
#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    /// Return only the trailing N status entries (all when omitted)
    pub limit: Option<usize>,
}

/// Status endpoint response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub counts: CowCounts,
    pub progress: u8,
    pub status_log: Vec<StatusEntry>,
}

/// Create the API router.
pub fn create_router(state: ApiState) -> Router {
    // The dashboard is served from a different origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "herdwatch"
    }))
}

/// Current counts, progress and status log.
async fn get_status(
    State(state): State<ApiState>,
    Query(params): Query<StatusQuery>,
) -> Json<StatusResponse> {
    let limit = params.limit.unwrap_or(0);
    Json(StatusResponse {
        counts: state.dashboard.counts(),
        progress: state.dashboard.progress(),
        status_log: state.dashboard.status_tail(limit),
    })
}

/// Start the status API server.
pub async fn start_api_server(state: ApiState, config: &DashboardConfig) -> Result<()> {
    let router = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting status API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> ApiState {
        let dashboard = Arc::new(DashboardState::new(0, false));
        for i in 0..5 {
            dashboard.push_status(format!("entry {}", i));
        }
        dashboard.mark_submitted();
        ApiState { dashboard }
    }

    #[tokio::test]
    async fn test_status_returns_full_log() {
        let state = test_state();
        let Json(response) =
            get_status(State(state), Query(StatusQuery { limit: None })).await;

        assert_eq!(response.progress, 75);
        assert_eq!(response.status_log.len(), 5);
        assert_eq!(response.counts, CowCounts::default());
    }

    #[tokio::test]
    async fn test_status_honors_limit() {
        let state = test_state();
        let Json(response) =
            get_status(State(state), Query(StatusQuery { limit: Some(2) })).await;

        assert_eq!(response.status_log.len(), 2);
        assert_eq!(response.status_log[0].message, "entry 3");
    }

    #[test]
    fn test_router_builds() {
        let state = test_state();
        let _router = create_router(state);
    }
}
