use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::actuation::{ActuationController, PulseSource, RelayState};
use crate::db::{history_limit, Db};
use crate::gateway::{self, CommandEntry, CommandError, CommandResponse};
use crate::state::SharedState;

const INDEX_HTML: &str = include_str!("ui/index.html");

#[derive(Clone)]
pub struct AppState {
    pub controller: ActuationController,
    pub shared: SharedState,
    pub db: Db,
}

#[derive(Debug, Deserialize)]
struct WaterForm {
    plant: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/receive", post(receive))
        .route("/water", post(water))
        .route("/status", get(relay_status))
        .route("/api/status", get(api_status))
        .route("/api/telemetry", get(telemetry_history))
        .route("/api/telemetry/latest", get(telemetry_latest))
        .with_state(state)
}

async fn index() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], INDEX_HTML)
}

/// Webhook command: `{"message": ...}` mapping plants to seconds.
async fn receive(State(app): State<AppState>, body: Bytes) -> Response {
    let entries = match gateway::parse_webhook(&body) {
        Ok(entries) => entries,
        Err(e) => return command_error(&app, e).await,
    };
    run_command(&app, &entries, PulseSource::Command).await
}

/// Manual form submission from the index page.
async fn water(State(app): State<AppState>, Form(form): Form<WaterForm>) -> Response {
    let entry = match gateway::parse_manual(form.plant.as_deref(), form.duration.as_deref()) {
        Ok(entry) => entry,
        Err(e) => return command_error(&app, e).await,
    };
    run_command(&app, &[entry], PulseSource::Manual).await
}

async fn run_command(app: &AppState, entries: &[CommandEntry], source: PulseSource) -> Response {
    match gateway::dispatch(&app.controller, entries, source).await {
        Ok(accepted) => (
            StatusCode::OK,
            Json(CommandResponse::success(gateway::describe(&accepted))),
        )
            .into_response(),
        Err(e) => command_error(app, e).await,
    }
}

async fn command_error(app: &AppState, e: CommandError) -> Response {
    app.shared.write().await.record_error(e.to_string());
    (StatusCode::BAD_REQUEST, Json(CommandResponse::error(e.to_string()))).into_response()
}

/// `{"plant1": "ON", "plant2": "OFF"}` in plant order.
async fn relay_status(State(app): State<AppState>) -> Json<Map<String, Value>> {
    let map = app
        .controller
        .status()
        .into_iter()
        .map(|r| {
            let label = match r.state {
                RelayState::Active => "ON",
                RelayState::Idle => "OFF",
            };
            (format!("plant{}", r.plant), Value::from(label))
        })
        .collect();
    Json(map)
}

async fn api_status(State(app): State<AppState>) -> impl IntoResponse {
    let relays = app.controller.status();
    let st = app.shared.read().await;
    Json(st.to_status(relays))
}

async fn telemetry_latest(State(app): State<AppState>) -> Response {
    match app.db.latest_snapshot().await {
        Ok(Some(row)) => Json(row).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no telemetry recorded yet" })),
        )
            .into_response(),
        Err(e) => storage_error(e),
    }
}

async fn telemetry_history(
    State(app): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Response {
    match app.db.recent_snapshots(history_limit(q.limit)).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => storage_error(e),
    }
}

fn storage_error(e: anyhow::Error) -> Response {
    error!("telemetry query failed: {e:#}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "storage unavailable" })),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("web ui listening on http://{addr}");

    axum::serve(listener, router(state))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
