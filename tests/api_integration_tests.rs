//! Integration tests for the wax-enrich API endpoints
//!
//! Upstream catalog and generation services are stubbed with a throwaway
//! axum server bound to port 0; per-route hit counters verify that early
//! pipeline failures make no downstream calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    routing::{get, post},
    Json, Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use wax_enrich::config::AppConfig;
use wax_enrich::services::anthropic_client::{AnthropicClient, DEFAULT_MODEL};
use wax_enrich::services::discogs_client::DiscogsClient;
use wax_enrich::AppState;

#[derive(Default)]
struct Counters {
    search: AtomicUsize,
    detail: AtomicUsize,
    messages: AtomicUsize,
}

#[derive(Clone)]
struct StubState {
    counters: Arc<Counters>,
    search_body: Arc<Value>,
    detail_body: Arc<Value>,
    detail_status: StatusCode,
    messages_body: Arc<Value>,
    messages_delay: Duration,
}

struct StubUpstream {
    base_url: String,
    counters: Arc<Counters>,
}

async fn stub_search(State(state): State<StubState>) -> Json<Value> {
    state.counters.search.fetch_add(1, Ordering::SeqCst);
    Json((*state.search_body).clone())
}

async fn stub_detail(State(state): State<StubState>) -> (StatusCode, Json<Value>) {
    state.counters.detail.fetch_add(1, Ordering::SeqCst);
    (state.detail_status, Json((*state.detail_body).clone()))
}

async fn stub_messages(State(state): State<StubState>) -> Json<Value> {
    state.counters.messages.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(state.messages_delay).await;
    Json((*state.messages_body).clone())
}

/// Spawn a stub server standing in for both upstream services.
async fn spawn_stub(
    search_results: impl FnOnce(&str) -> Value,
    detail_body: Value,
    detail_status: StatusCode,
    messages_body: Value,
) -> StubUpstream {
    spawn_stub_with_delay(
        search_results,
        detail_body,
        detail_status,
        messages_body,
        Duration::ZERO,
    )
    .await
}

/// Spawn a stub whose generation route stalls before responding.
async fn spawn_stub_with_delay(
    search_results: impl FnOnce(&str) -> Value,
    detail_body: Value,
    detail_status: StatusCode,
    messages_body: Value,
    messages_delay: Duration,
) -> StubUpstream {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind stub listener");
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let counters = Arc::new(Counters::default());
    let state = StubState {
        counters: counters.clone(),
        search_body: Arc::new(json!({ "results": search_results(&base_url) })),
        detail_body: Arc::new(detail_body),
        detail_status,
        messages_body: Arc::new(messages_body),
        messages_delay,
    };

    let app = Router::new()
        .route("/database/search", get(stub_search))
        .route("/releases/123", get(stub_detail))
        .route("/v1/messages", post(stub_messages))
        .with_state(state);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    StubUpstream { base_url, counters }
}

fn default_search_results(base_url: &str) -> Value {
    json!([{
        "id": 123,
        "resource_url": format!("{}/releases/123", base_url),
        "title": "Miles Davis - Kind Of Blue",
        "year": "1959",
        "country": "US",
        "cover_image": "https://img.example/cover.jpg",
        "label": ["Columbia"],
        "format": ["Vinyl", "LP", "Album"],
        "genre": ["Jazz"],
        "style": ["Modal"],
        "catno": "CL 1355"
    }])
}

fn default_detail() -> Value {
    json!({
        "title": "Kind Of Blue",
        "year": 1959,
        "country": "US",
        "genres": ["Jazz"],
        "styles": ["Modal"],
        "lowest_price": 24.99,
        "num_for_sale": 310,
        "community": { "want": 120, "have": 80 }
    })
}

fn default_messages() -> Value {
    json!({
        "content": [
            { "type": "text", "text": "A." },
            { "type": "server_tool_use", "id": "srvtoolu_1", "name": "web_search",
              "input": { "query": "kind of blue review" } },
            { "type": "text", "text": " B." }
        ]
    })
}

/// Test helper: create the app wired to a stub upstream.
fn create_test_app(stub_base: &str, max_requests: u32) -> (Router, AppState) {
    create_test_app_with_deadline(stub_base, max_requests, Duration::from_secs(10))
}

fn create_test_app_with_deadline(
    stub_base: &str,
    max_requests: u32,
    deadline: Duration,
) -> (Router, AppState) {
    let config = AppConfig {
        discogs_token: "test-token".to_string(),
        anthropic_api_key: "test-key".to_string(),
        model: DEFAULT_MODEL.to_string(),
        max_tokens: 256,
        web_search: false,
        max_requests,
        window: Duration::from_secs(3600),
        deadline,
    };

    let discogs = DiscogsClient::new(config.discogs_token.clone())
        .expect("Failed to create Discogs client")
        .with_base_url(stub_base);
    let anthropic = AnthropicClient::new(config.anthropic_api_key.clone(), config.model.clone())
        .expect("Failed to create Anthropic client")
        .with_base_url(stub_base);

    let state = AppState::new(config, discogs, anthropic);
    (wax_enrich::build_router(state.clone()), state)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn response_json(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _state) = create_test_app("http://127.0.0.1:9", 10);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = response_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "wax-enrich");
    assert!(json.get("last_error").is_none());
}

#[tokio::test]
async fn test_enrich_end_to_end() {
    let stub = spawn_stub(
        default_search_results,
        default_detail(),
        StatusCode::OK,
        default_messages(),
    )
    .await;
    let (app, _state) = create_test_app(&stub.base_url, 10);

    let response = app
        .oneshot(post_json("/enrich", json!({ "query": "kind of blue" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok()),
        Some("9")
    );

    let json = response_json(response).await;
    assert_eq!(json["success"], true);
    // Detail fields take precedence over the search summary
    assert_eq!(json["record"]["title"], "Kind Of Blue");
    assert_eq!(json["record"]["year"], "1959");
    assert_eq!(json["record"]["label"], "Columbia");
    assert_eq!(json["record"]["wantCount"], 120);
    assert_eq!(json["record"]["haveCount"], 80);
    assert_eq!(json["record"]["lowestPrice"], 24.99);
    assert_eq!(json["record"]["numForSale"], 310);
    // Text blocks concatenated in order, tool-use block skipped
    assert_eq!(json["explanation"], "A. B.");

    assert_eq!(stub.counters.search.load(Ordering::SeqCst), 1);
    assert_eq!(stub.counters.detail.load(Ordering::SeqCst), 1);
    assert_eq!(stub.counters.messages.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_enrich_rejects_empty_query() {
    let (app, _state) = create_test_app("http://127.0.0.1:9", 10);

    let response = app
        .oneshot(post_json("/enrich", json!({ "query": "   " })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = response_json(response).await;
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_enrich_no_results_makes_no_downstream_calls() {
    let stub = spawn_stub(
        |_| json!([]),
        default_detail(),
        StatusCode::OK,
        default_messages(),
    )
    .await;
    let (app, _state) = create_test_app(&stub.base_url, 10);

    let response = app
        .oneshot(post_json("/enrich", json!({ "query": "does not exist" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = response_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "No results found");

    assert_eq!(stub.counters.search.load(Ordering::SeqCst), 1);
    assert_eq!(stub.counters.detail.load(Ordering::SeqCst), 0);
    assert_eq!(stub.counters.messages.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_enrich_rate_limited() {
    let stub = spawn_stub(
        default_search_results,
        default_detail(),
        StatusCode::OK,
        default_messages(),
    )
    .await;
    let (app, state) = create_test_app(&stub.base_url, 1);

    // Exhaust the single-request quota for the identity the handler will
    // derive (no forwarding headers -> "unknown")
    let before = chrono::Utc::now();
    assert!(state.rate_limiter.check("unknown").allowed);

    let response = app
        .oneshot(post_json("/enrich", json!({ "query": "kind of blue" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok()),
        Some("0")
    );
    assert!(response.headers().get("x-ratelimit-reset").is_some());

    let json = response_json(response).await;
    assert_eq!(json["success"], false);
    let reset_at: chrono::DateTime<chrono::Utc> = json["resetAt"]
        .as_str()
        .expect("denial must carry resetAt")
        .parse()
        .unwrap();
    assert!(reset_at > before);

    // Denied before any upstream traffic
    assert_eq!(stub.counters.search.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_enrich_remaining_decreases_per_call() {
    let stub = spawn_stub(
        default_search_results,
        default_detail(),
        StatusCode::OK,
        default_messages(),
    )
    .await;
    let (app, _state) = create_test_app(&stub.base_url, 3);

    for expected in ["2", "1", "0"] {
        let response = app
            .clone()
            .oneshot(post_json("/enrich", json!({ "query": "kind of blue" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok()),
            Some(expected)
        );
    }

    let response = app
        .oneshot(post_json("/enrich", json!({ "query": "kind of blue" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_enrich_upstream_error_recorded() {
    let stub = spawn_stub(
        default_search_results,
        json!({ "message": "boom" }),
        StatusCode::INTERNAL_SERVER_ERROR,
        default_messages(),
    )
    .await;
    let (app, state) = create_test_app(&stub.base_url, 10);

    let response = app
        .oneshot(post_json("/enrich", json!({ "query": "kind of blue" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = response_json(response).await;
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("500"));

    // Failure is recorded for /health diagnostics
    let last_error = state.last_error.read().await.clone();
    assert!(last_error.unwrap().contains("500"));

    // Pipeline stopped before the generation stage
    assert_eq!(stub.counters.messages.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_enrich_deadline_expiry_fails_with_timeout() {
    // Generation stalls well past the configured deadline
    let stub = spawn_stub_with_delay(
        default_search_results,
        default_detail(),
        StatusCode::OK,
        default_messages(),
        Duration::from_millis(500),
    )
    .await;
    let (app, state) = create_test_app_with_deadline(&stub.base_url, 10, Duration::from_millis(50));

    let response = app
        .oneshot(post_json("/enrich", json!({ "query": "kind of blue" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = response_json(response).await;
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("timed out"));

    // The pipeline got as far as the stalled generation call, then the
    // in-flight request was dropped on expiry
    assert_eq!(stub.counters.search.load(Ordering::SeqCst), 1);
    assert_eq!(stub.counters.detail.load(Ordering::SeqCst), 1);
    assert_eq!(stub.counters.messages.load(Ordering::SeqCst), 1);

    let last_error = state.last_error.read().await.clone();
    assert!(last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_search_endpoint_returns_summaries() {
    let stub = spawn_stub(
        |base| {
            json!([
                {
                    "id": 123,
                    "resource_url": format!("{}/releases/123", base),
                    "title": "Miles Davis - Kind Of Blue",
                    "year": "1959",
                    "country": "US",
                    "cover_image": "https://img.example/cover.jpg"
                },
                {
                    "id": 456,
                    "resource_url": format!("{}/releases/456", base),
                    "title": "Miles Davis - Kind Of Blue (Reissue)",
                    "thumb": "https://img.example/thumb.jpg"
                }
            ])
        },
        default_detail(),
        StatusCode::OK,
        default_messages(),
    )
    .await;
    let (app, _state) = create_test_app(&stub.base_url, 10);

    let response = app
        .oneshot(post_json("/search", json!({ "query": "kind of blue" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = response_json(response).await;
    assert_eq!(json["success"], true);
    let records = json["records"].as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["title"], "Miles Davis - Kind Of Blue");
    assert_eq!(records[0]["coverImage"], "https://img.example/cover.jpg");
    // Second record falls back to its thumbnail
    assert_eq!(records[1]["coverImage"], "https://img.example/thumb.jpg");
}

#[tokio::test]
async fn test_search_empty_results_reports_success_false() {
    let stub = spawn_stub(
        |_| json!([]),
        default_detail(),
        StatusCode::OK,
        default_messages(),
    )
    .await;
    let (app, _state) = create_test_app(&stub.base_url, 10);

    let response = app
        .oneshot(post_json("/search", json!({ "query": "does not exist" })))
        .await
        .unwrap();

    // Deliberate 200 with success:false, per the documented interface
    assert_eq!(response.status(), StatusCode::OK);

    let json = response_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "No results found");
}
