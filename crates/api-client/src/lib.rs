use crate::error::ApiError;
use async_trait::async_trait;
use configuration::ProbeCredentials;
use core_types::HttpMethod;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use std::collections::BTreeMap;

pub mod auth;
pub mod error;

/// A fully resolved request for one probe attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRequest {
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    /// Sign the request with the transport's credentials.
    pub auth: bool,
}

impl ProbeRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            auth: false,
        }
    }
}

/// The status and raw body of a response. The body stays available after
/// JSON parsing so callers can inspect or measure it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ProbeResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn size(&self) -> usize {
        self.body.len()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The abstract HTTP transport used by every probe.
///
/// This trait is the contract the engine uses, allowing the underlying
/// implementation (live or scripted) to be swapped out. Timeouts and
/// cancellation are enforced by the caller by dropping the returned future.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn send(&self, request: &ProbeRequest) -> Result<ProbeResponse, ApiError>;

    /// Whether requests marked `auth` can be signed.
    fn is_authenticated(&self) -> bool {
        false
    }
}

/// A `ProbeTransport` backed by a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    credentials: Option<ProbeCredentials>,
}

impl ReqwestTransport {
    pub fn new(credentials: Option<ProbeCredentials>) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("sentinel-probe/", env!("CARGO_PKG_VERSION"))),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            credentials,
        })
    }
}

#[async_trait]
impl ProbeTransport for ReqwestTransport {
    async fn send(&self, request: &ProbeRequest) -> Result<ProbeResponse, ApiError> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;

        let url = match (&self.credentials, request.auth) {
            (Some(creds), true) => auth::sign_url_now(&creds.api_secret, &request.url)?,
            (None, true) => return Err(ApiError::MissingCredentials),
            (_, false) => request.url.clone(),
        };

        let mut builder = self.client.request(method, &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let (Some(creds), true) = (&self.credentials, request.auth) {
            builder = builder.header(auth::API_KEY_HEADER, creds.api_key.as_str());
        }
        if let Some(body) = &request.body {
            if request.method != HttpMethod::Get && request.method != HttpMethod::Head {
                builder = builder.json(body);
            }
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        tracing::trace!(url = %request.url, status, bytes = body.len(), "Probe response received.");

        Ok(ProbeResponse { status, body })
    }

    fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_helpers() {
        let response = ProbeResponse::new(204, b"{\"ok\":true}".to_vec());
        assert!(response.is_success());
        assert_eq!(response.size(), 11);
        assert_eq!(response.json().unwrap()["ok"], true);
        assert!(ProbeResponse::new(200, b"not json".to_vec()).json().is_err());
    }

    #[test]
    fn transport_reports_credentials() {
        let anonymous = ReqwestTransport::new(None).unwrap();
        assert!(!anonymous.is_authenticated());

        let signed = ReqwestTransport::new(Some(ProbeCredentials {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
        }))
        .unwrap();
        assert!(signed.is_authenticated());
    }
}
