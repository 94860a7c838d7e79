use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("aborted")]
    Aborted,

    #[error("Request requires credentials but none are configured")]
    MissingCredentials,

    #[error("Failed to sign request: {0}")]
    Signing(String),
}
