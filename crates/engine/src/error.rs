use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API client error: {0}")]
    ApiClient(#[from] api_client::error::ApiError),

    #[error("Snapshot store error: {0}")]
    Store(#[from] snapshot_store::StoreError),

    #[error("Service '{0}' is not registered with the supervisor.")]
    UnknownService(String),

    #[error("Spec '{0}' is not declared by this service.")]
    UnknownSpec(String),
}

#[derive(Error, Debug)]
pub enum DiagnosticsError {
    #[error("No diagnostics endpoint named '{0}' is registered.")]
    UnknownEndpoint(String),
}
