use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use vaultsync_core::SyncEngine;

use crate::auth::authorize;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::session::{run_session, ConnectParams};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    engine: SyncEngine,
    shutdown: CancellationToken,
}

impl AppState {
    pub const fn new(config: Arc<AppConfig>, engine: SyncEngine, shutdown: CancellationToken) -> Self {
        Self {
            config,
            engine,
            shutdown,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(connect))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    sessions: usize,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        sessions: state.engine.hub().session_count().await,
    })
}

async fn connect(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AppError> {
    authorize(&headers, state.config.auth_token.as_deref())?;
    if params.vault.trim().is_empty() || params.user.trim().is_empty() {
        return Err(AppError::bad_request("vault and user are required"));
    }
    let ws = ws?;

    tracing::debug!(vault = %params.vault, client = params.client_name(), "Upgrading session");
    let AppState {
        engine, shutdown, ..
    } = state;
    Ok(ws.on_upgrade(move |socket| run_session(socket, engine, params, shutdown)))
}
