// tests/reqwest_transport.rs
// Real HTTP against an in-process axum server on loopback.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use reqwest::Url;
use saas_event_poller::http::{
    BearerAuth, HttpTransport, ReqwestTransport, RetryExecutor, TransportError,
};
use saas_event_poller::ingest::types::ResponseShape;
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct Hits(Arc<AtomicUsize>);

async fn threats(State(hits): State<Hits>, headers: HeaderMap) -> Response {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if auth != "Bearer tok" {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if hits.0.fetch_add(1, Ordering::SeqCst) == 0 {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, "1")],
            "slow down",
        )
            .into_response();
    }
    Json(json!({ "threats": [{ "threatId": "a", "receivedTime": "2024-01-01T00:00:00Z" }] }))
        .into_response()
}

async fn serve() -> (String, Hits) {
    let hits = Hits::default();
    let app = Router::new()
        .route("/v1/threats", get(threats))
        .with_state(hits.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), hits)
}

#[tokio::test]
async fn rate_limited_then_ok_over_real_http() {
    let (base, hits) = serve().await;
    let transport = Arc::new(ReqwestTransport::new().unwrap());
    let exec = RetryExecutor::new(transport, Arc::new(BearerAuth::new("tok")));
    let url = Url::parse(&format!("{base}/v1/threats?pageNumber=1")).unwrap();

    let started = Instant::now();
    let page = exec
        .execute(&url, "threats", &ResponseShape::paged("threats"), &CancellationToken::new())
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(hits.0.load(Ordering::SeqCst), 2);
    assert_eq!(page.items()[0]["threatId"], "a");
}

#[tokio::test]
async fn retry_after_header_is_surfaced() {
    let (base, _hits) = serve().await;
    let transport = ReqwestTransport::new().unwrap();
    let url = Url::parse(&format!("{base}/v1/threats")).unwrap();
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::AUTHORIZATION,
        reqwest::header::HeaderValue::from_static("Bearer tok"),
    );

    let resp = transport.get(&url, headers).await.unwrap();
    assert_eq!(resp.status, 429);
    assert_eq!(resp.retry_after.as_deref(), Some("1"));
    assert_eq!(resp.body, b"slow down");
}

#[tokio::test]
async fn shut_down_transport_refuses_requests() {
    let (base, hits) = serve().await;
    let transport = ReqwestTransport::new().unwrap();
    transport.shutdown();

    let url = Url::parse(&format!("{base}/v1/threats")).unwrap();
    let err = transport
        .get(&url, reqwest::header::HeaderMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Failed(_)));
    assert_eq!(hits.0.load(Ordering::SeqCst), 0);
}
