use crate::error::ApiError;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;

// Create a type alias for the HMAC-SHA256 implementation.
type HmacSha256 = Hmac<Sha256>;

/// Header carrying the API key on signed requests.
pub const API_KEY_HEADER: &str = "X-API-KEY";

/// Creates an HMAC-SHA256 signature for a given query string.
///
/// # Arguments
///
/// * `secret` - The API secret key.
/// * `query_string` - The full query string of the request, including the timestamp.
///
/// # Returns
///
/// A hexadecimal string representation of the signature.
pub fn sign_request(secret: &str, query_string: &str) -> Result<String, ApiError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ApiError::Signing(e.to_string()))?;
    mac.update(query_string.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Appends `timestamp` and `signature` query parameters to `url`.
///
/// The signature covers the existing query string (if any) plus the timestamp.
pub fn sign_url(secret: &str, url: &str, timestamp_ms: i64) -> Result<String, ApiError> {
    let mut params = BTreeMap::new();
    params.insert("timestamp", timestamp_ms.to_string());
    let timestamp_query =
        serde_qs::to_string(&params).map_err(|e| ApiError::Signing(e.to_string()))?;

    let (base, existing_query) = match url.split_once('?') {
        Some((base, query)) if !query.is_empty() => (base, Some(query)),
        Some((base, _)) => (base, None),
        None => (url, None),
    };
    let query_string = match existing_query {
        Some(query) => format!("{}&{}", query, timestamp_query),
        None => timestamp_query,
    };
    let signature = sign_request(secret, &query_string)?;

    Ok(format!("{}?{}&signature={}", base, query_string, signature))
}

/// Signs `url` with the current wall-clock time.
pub fn sign_url_now(secret: &str, url: &str) -> Result<String, ApiError> {
    sign_url(secret, url, Utc::now().timestamp_millis())
}
