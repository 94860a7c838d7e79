use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use engine::{DiagnosticsError, EngineError};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("Diagnostics error: {0}")]
    Diagnostics(#[from] DiagnosticsError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Converts our custom `AppError` into an HTTP response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Engine(
                e @ (EngineError::UnknownService(_) | EngineError::UnknownSpec(_)),
            ) => (StatusCode::NOT_FOUND, e.to_string()),
            AppError::Engine(engine_err) => {
                tracing::error!(error = ?engine_err, "Engine error.");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal engine error occurred".to_string(),
                )
            }
            AppError::Diagnostics(e) => (StatusCode::NOT_FOUND, e.to_string()),
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            AppError::Conflict(message) => (StatusCode::CONFLICT, message),
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}
