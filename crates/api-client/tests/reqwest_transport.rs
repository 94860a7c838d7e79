use api_client::error::ApiError;
use api_client::{ProbeRequest, ProbeTransport, ReqwestTransport};
use axum::extract::RawQuery;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use configuration::ProbeCredentials;
use core_types::HttpMethod;
use serde_json::{Value, json};
use std::net::SocketAddr;

async fn spawn_server() -> SocketAddr {
    let app = Router::new()
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .route(
            "/missing",
            get(|| async { (StatusCode::NOT_FOUND, "nope") }),
        )
        .route("/echo", post(|Json(body): Json<Value>| async move { Json(body) }))
        .route(
            "/signed",
            get(|headers: HeaderMap, RawQuery(query): RawQuery| async move {
                let key = headers
                    .get("x-api-key")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Json(json!({ "key": key, "query": query.unwrap_or_default() }))
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn fetches_status_and_body() {
    let addr = spawn_server().await;
    let transport = ReqwestTransport::new(None).unwrap();

    let response = transport
        .send(&ProbeRequest::get(format!("http://{}/health", addr)))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.json().unwrap()["status"], "ok");

    let missing = transport
        .send(&ProbeRequest::get(format!("http://{}/missing", addr)))
        .await
        .unwrap();
    assert_eq!(missing.status, 404);
    assert_eq!(missing.body, b"nope".to_vec());
}

#[tokio::test]
async fn sends_json_bodies_for_post() {
    let addr = spawn_server().await;
    let transport = ReqwestTransport::new(None).unwrap();

    let mut request = ProbeRequest::get(format!("http://{}/echo", addr));
    request.method = HttpMethod::Post;
    request.body = Some(json!({ "symbol": "BTCUSDT" }));

    let response = transport.send(&request).await.unwrap();
    assert_eq!(response.json().unwrap()["symbol"], "BTCUSDT");
}

#[tokio::test]
async fn signs_authenticated_requests() {
    let addr = spawn_server().await;
    let transport = ReqwestTransport::new(Some(ProbeCredentials {
        api_key: "probe-key".to_string(),
        api_secret: "probe-secret".to_string(),
    }))
    .unwrap();

    let mut request = ProbeRequest::get(format!("http://{}/signed", addr));
    request.auth = true;

    let body = transport.send(&request).await.unwrap().json().unwrap();
    assert_eq!(body["key"], "probe-key");
    let query = body["query"].as_str().unwrap();
    assert!(query.starts_with("timestamp="));
    assert!(query.contains("&signature="));
}

#[tokio::test]
async fn unauthenticated_transport_refuses_signed_requests() {
    let transport = ReqwestTransport::new(None).unwrap();
    let mut request = ProbeRequest::get("http://127.0.0.1:9/never");
    request.auth = true;

    let err = transport.send(&request).await.unwrap_err();
    assert!(matches!(err, ApiError::MissingCredentials));
}

#[tokio::test]
async fn connection_failures_surface_as_request_errors() {
    let transport = ReqwestTransport::new(None).unwrap();
    // Port 9 (discard) is almost never listening on loopback.
    let err = transport
        .send(&ProbeRequest::get("http://127.0.0.1:9/health"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Request(_)));
}
