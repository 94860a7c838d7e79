use axum::{
    Router,
    routing::{get, post, put},
};
use engine::Supervisor;
use events::ProbeMessage;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, Any, CorsLayer, ExposeHeaders},
    trace::TraceLayer,
};

pub mod error;
pub mod handlers;

/// The shared application state that all handlers can access.
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    /// The channel the supervisor's engines publish on; `/ws` subscribes to it.
    pub events: broadcast::Sender<ProbeMessage>,
}

/// Builds the HTTP router over a supervisor.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(Any)
        .allow_headers(AllowHeaders::any())
        .expose_headers(ExposeHeaders::any());

    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/services", get(handlers::list_services))
        .route("/api/services/:id/results", get(handlers::get_results))
        .route("/api/services/:id/summary", get(handlers::get_summary))
        .route("/api/services/:id/history", get(handlers::get_history))
        .route("/api/services/:id/run", post(handlers::run_service))
        .route("/api/services/:id/abort", post(handlers::abort_service))
        .route(
            "/api/services/:id/overrides/:spec_id",
            put(handlers::put_override),
        )
        .route("/api/diagnostics", get(handlers::get_diagnostics))
        .route(
            "/api/diagnostics/:name/sample",
            post(handlers::sample_diagnostics),
        )
        .route("/ws", get(handlers::websocket_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serves the API until `shutdown` fires.
///
/// Tracing must already be initialized by the caller.
pub async fn run_server(
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Web server started and listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
