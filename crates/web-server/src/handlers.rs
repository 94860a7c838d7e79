use crate::{AppState, error::AppError};
use analytics::{LatencyHistory, ServiceHealth, Summary};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
};
use core_types::{ContractTestResult, SpecOverride};
use engine::{ContractTestEngine, DiagnosticSample, EndpointReport, EngineError, RunOptions};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOverview {
    pub id: String,
    pub base_url: String,
    pub specs: usize,
    pub running: bool,
    pub health: ServiceHealth,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunQuery {
    pub parallel: Option<bool>,
}

fn find_engine<'a>(state: &'a AppState, id: &str) -> Result<&'a Arc<ContractTestEngine>, AppError> {
    state
        .supervisor
        .engine(id)
        .ok_or_else(|| EngineError::UnknownService(id.to_string()).into())
}

/// # GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "services": state.supervisor.service_ids().len(),
    }))
}

/// # GET /api/services
pub async fn list_services(State(state): State<Arc<AppState>>) -> Json<Vec<ServiceOverview>> {
    let mut services = Vec::new();
    for engine in state.supervisor.engines() {
        services.push(ServiceOverview {
            id: engine.service_id().to_string(),
            base_url: engine.base_url().to_string(),
            specs: engine.specs().await.len(),
            running: engine.is_running(),
            health: engine.summary().await.health,
        });
    }
    Json(services)
}

/// # GET /api/services/:id/results
pub async fn get_results(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ContractTestResult>>, AppError> {
    Ok(Json(find_engine(&state, &id)?.results().await))
}

/// # GET /api/services/:id/summary
pub async fn get_summary(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Summary>, AppError> {
    Ok(Json(find_engine(&state, &id)?.summary().await))
}

/// # GET /api/services/:id/history
pub async fn get_history(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<LatencyHistory>, AppError> {
    Ok(Json(find_engine(&state, &id)?.history().await))
}

/// # POST /api/services/:id/run
/// Runs one batch and returns its results. Answers 409 when a batch is
/// already in flight.
pub async fn run_service(
    Path(id): Path<String>,
    Query(query): Query<RunQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ContractTestResult>>, AppError> {
    let engine = find_engine(&state, &id)?;
    let options = RunOptions {
        parallel: query
            .parallel
            .unwrap_or(state.supervisor.default_run_options().parallel),
    };
    engine
        .run_all(options)
        .await
        .map(Json)
        .ok_or_else(|| AppError::Conflict(format!("a batch is already running for {}", id)))
}

/// # POST /api/services/:id/abort
pub async fn abort_service(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    let aborted = find_engine(&state, &id)?.abort();
    Ok(Json(json!({ "aborted": aborted })))
}

/// # PUT /api/services/:id/overrides/:spec_id
pub async fn put_override(
    Path((id, spec_id)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
    Json(spec_override): Json<SpecOverride>,
) -> Result<StatusCode, AppError> {
    find_engine(&state, &id)?
        .set_override(&spec_id, spec_override)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// # GET /api/diagnostics
pub async fn get_diagnostics(State(state): State<Arc<AppState>>) -> Json<Vec<EndpointReport>> {
    Json(state.supervisor.diagnostics().report().await)
}

/// # POST /api/diagnostics/:name/sample
pub async fn sample_diagnostics(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<DiagnosticSample>, AppError> {
    Ok(Json(state.supervisor.diagnostics().sample(&name).await?))
}

/// # GET /ws
/// Streams every `ProbeMessage` as a JSON text frame.
pub async fn websocket_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    tracing::info!("[WS] New client connected.");
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.events.subscribe();

    let mut forward = tokio::spawn(async move {
        loop {
            let message = match events.recv().await {
                Ok(message) => message,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "[WS] Client lagging; events dropped.");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "[WS] Failed to encode event.");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut incoming = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::error!(error = %e, "[WS] Error.");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut forward => incoming.abort(),
        _ = &mut incoming => forward.abort(),
    }
    tracing::info!("[WS] Connection closed.");
}
