//! HTTP integration tests for the Parley API
//!
//! These drive the full Axum router with `oneshot`, backed by the in-memory
//! store, a scripted completion provider and a static identity provider.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use parley_core::config::WidgetConfig;
use parley_core::testing::{Scripted, ScriptedProvider, StaticIdentityProvider};
use parley_core::InMemoryStore;
use parley_server::http::{build_router, HttpState};
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

const OWNER_TOKEN: &str = "owner-token";
const OTHER_TOKEN: &str = "other-token";

struct TestApp {
    router: Router,
    store: Arc<InMemoryStore>,
    provider: Arc<ScriptedProvider>,
}

fn make_app() -> TestApp {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(ScriptedProvider::replying("Happy to help!"));
    let identity = StaticIdentityProvider::new()
        .with_user(OWNER_TOKEN, Uuid::new_v4())
        .with_user(OTHER_TOKEN, Uuid::new_v4());

    let state = Arc::new(HttpState {
        store: store.clone(),
        inference: provider.clone(),
        identity: Arc::new(identity),
        widget: WidgetConfig {
            public_base_url: "https://parley.example".to_string(),
            ..Default::default()
        },
    });

    TestApp {
        router: build_router(state),
        store,
        provider,
    }
}

async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let resp = app.router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    (status, headers, body)
}

async fn send_json(app: &TestApp, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let (status, _, body) = send(app, req).await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    (status, json)
}

fn owner_request(method: &str, uri: &str, token: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", token));
    match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn chat_request(key: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/widget/chat")
        .header("content-type", "application/json");
    if let Some(k) = key {
        builder = builder.header("x-agent-api-key", k);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn create_agent(app: &TestApp, body: serde_json::Value) -> serde_json::Value {
    let (status, json) = send_json(app, owner_request("POST", "/api/agents", OWNER_TOKEN, Some(body))).await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {:?}", json);
    json["agent"].clone()
}

// ===========================================================================
// TEST 1: GET /version and /health
// ===========================================================================
#[tokio::test]
async fn test_version_and_health() {
    let app = make_app();

    let req = Request::builder().uri("/version").body(Body::empty()).unwrap();
    let (status, json) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["protocol"], "parley/1");

    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, json) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
}

// ===========================================================================
// TEST 2: OPTIONS preflight returns the CORS headers and no body
// ===========================================================================
#[tokio::test]
async fn test_chat_preflight() {
    let app = make_app();
    let req = Request::builder()
        .method("OPTIONS")
        .uri("/api/widget/chat")
        .header("origin", "https://shop.example")
        .body(Body::empty())
        .unwrap();

    let (status, headers, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["access-control-allow-origin"], "*");
    assert_eq!(headers["access-control-allow-methods"], "POST, OPTIONS");
    assert_eq!(
        headers["access-control-allow-headers"],
        "Content-Type, x-agent-api-key"
    );
    assert!(body.is_empty());
    assert_eq!(app.provider.call_count(), 0);
}

// ===========================================================================
// TEST 3: chat happy path, continuing the same conversation
// ===========================================================================
#[tokio::test]
async fn test_chat_new_then_continue() {
    let app = make_app();
    let agent = create_agent(&app, json!({ "name": "Shop Helper", "role": "shop assistant" })).await;
    let key = agent["api_key"].as_str().unwrap();

    let (status, headers, body) = send(
        &app,
        chat_request(Some(key), r#"{"message":"Where is my order?","sessionId":"sess-1"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["access-control-allow-origin"], "*");
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["message"], "Happy to help!");
    let conversation_id = json["conversationId"].as_str().unwrap().to_string();

    let follow_up = json!({
        "message": "Thanks",
        "sessionId": "sess-1",
        "conversationId": conversation_id,
    })
    .to_string();
    let (status, json) = send_json(&app, chat_request(Some(key), &follow_up)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["conversationId"], conversation_id.as_str());

    // second request carries the system entry plus three stored messages
    let requests = app.provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].messages.len(), 4);
    assert_eq!(requests[1].model, "mistral-small-2402");
    assert_eq!(app.store.message_count(), 4);
}

// ===========================================================================
// TEST 4: chat without a credential is rejected before any work
// ===========================================================================
#[tokio::test]
async fn test_chat_missing_key() {
    let app = make_app();
    let (status, json) = send_json(
        &app,
        chat_request(None, r#"{"message":"Hi","sessionId":"sess-1"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["status"], "error");
    assert_eq!(app.store.conversation_count(), 0);
    assert_eq!(app.provider.call_count(), 0);
}

// ===========================================================================
// TEST 5: chat with an unknown or inactive credential
// ===========================================================================
#[tokio::test]
async fn test_chat_inactive_agent() {
    let app = make_app();
    let agent = create_agent(&app, json!({ "name": "Sleepy" })).await;
    let key = agent["api_key"].as_str().unwrap();
    let id = agent["id"].as_str().unwrap();

    let (status, _) = send_json(
        &app,
        owner_request(
            "PATCH",
            &format!("/api/agents/{}", id),
            OWNER_TOKEN,
            Some(json!({ "is_active": false })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send_json(
        &app,
        chat_request(Some(key), r#"{"message":"Hi","sessionId":"sess-1"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send_json(
        &app,
        chat_request(Some("agent_doesnotexist"), r#"{"message":"Hi","sessionId":"s"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.store.conversation_count(), 0);
}

// ===========================================================================
// TEST 6: chat validation and malformed bodies
// ===========================================================================
#[tokio::test]
async fn test_chat_bad_requests() {
    let app = make_app();
    let agent = create_agent(&app, json!({ "name": "Strict" })).await;
    let key = agent["api_key"].as_str().unwrap();

    for body in [
        r#"{"sessionId":"sess-1"}"#,
        r#"{"message":"Hi"}"#,
        r#"{"message":"   ","sessionId":"sess-1"}"#,
        r#"{"message":"Hi","sessionId":"sess-1","conversationId":"nope"}"#,
        "not json",
    ] {
        let (status, json) = send_json(&app, chat_request(Some(key), body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {}", body);
        assert_eq!(json["status"], "error");
    }

    // conversation that exists but belongs to another agent
    let other = create_agent(&app, json!({ "name": "Other" })).await;
    let (_, json) = send_json(
        &app,
        chat_request(
            Some(other["api_key"].as_str().unwrap()),
            r#"{"message":"Hi","sessionId":"sess-9"}"#,
        ),
    )
    .await;
    let foreign = json!({
        "message": "Hi",
        "sessionId": "sess-1",
        "conversationId": json["conversationId"],
    })
    .to_string();
    let (status, _) = send_json(&app, chat_request(Some(key), &foreign)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ===========================================================================
// TEST 7: provider quota exhaustion maps to 429 and leaves the user message
// ===========================================================================
#[tokio::test]
async fn test_chat_rate_limited() {
    let app = make_app();
    let agent = create_agent(&app, json!({ "name": "Popular" })).await;
    app.provider.push(Scripted::RateLimited);

    let (status, json) = send_json(
        &app,
        chat_request(
            agent["api_key"].as_str(),
            r#"{"message":"Hi","sessionId":"sess-1"}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["status"], "error");
    assert_eq!(app.store.message_count(), 1);
}

// ===========================================================================
// TEST 8: provider failure maps to 500
// ===========================================================================
#[tokio::test]
async fn test_chat_provider_failure() {
    let app = make_app();
    let agent = create_agent(&app, json!({ "name": "Flaky" })).await;
    app.provider.push(Scripted::Fail("upstream exploded".to_string()));

    let (status, json) = send_json(
        &app,
        chat_request(
            agent["api_key"].as_str(),
            r#"{"message":"Hi","sessionId":"sess-1"}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["status"], "error");
}

// ===========================================================================
// TEST 9: agent CRUD is scoped to the authenticated owner
// ===========================================================================
#[tokio::test]
async fn test_agent_crud_owner_scoping() {
    let app = make_app();
    let agent = create_agent(
        &app,
        json!({
            "name": "Concierge",
            "role": "hotel concierge",
            "instructions": "Be brief.",
            "model": "open-mixtral-8x22b",
            "temperature": 0.3,
            "max_tokens": 256,
        }),
    )
    .await;
    let id = agent["id"].as_str().unwrap();
    assert_eq!(agent["model"], "open-mixtral-8x22b");
    assert_eq!(agent["max_tokens"], 256);

    let (status, json) = send_json(&app, owner_request("GET", "/api/agents", OTHER_TOKEN, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["agents"].as_array().unwrap().len(), 0);

    let uri = format!("/api/agents/{}", id);
    let (status, _) = send_json(&app, owner_request("GET", &uri, OTHER_TOKEN, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send_json(&app, owner_request("DELETE", &uri, OTHER_TOKEN, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = send_json(
        &app,
        owner_request("PATCH", &uri, OWNER_TOKEN, Some(json!({ "instructions": "" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["agent"]["instructions"].is_null());
    assert_eq!(json["agent"]["name"], "Concierge");

    let (status, json) = send_json(&app, owner_request("DELETE", &uri, OWNER_TOKEN, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);

    let (status, _) = send_json(&app, owner_request("GET", &uri, OWNER_TOKEN, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ===========================================================================
// TEST 10: agent routes without a bearer token
// ===========================================================================
#[tokio::test]
async fn test_agent_routes_unauthenticated() {
    let app = make_app();
    let req = Request::builder().uri("/api/agents").body(Body::empty()).unwrap();
    let (status, json) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["status"], "error");

    let (status, _) = send_json(&app, owner_request("GET", "/api/agents", "bogus", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ===========================================================================
// TEST 11: statistics reflect widget traffic
// ===========================================================================
#[tokio::test]
async fn test_statistics_after_chat() {
    let app = make_app();
    let agent = create_agent(&app, json!({ "name": "Counter" })).await;
    let key = agent["api_key"].as_str().unwrap();

    for session in ["a", "b"] {
        let body = json!({ "message": "Hi", "sessionId": session }).to_string();
        let (status, _) = send_json(&app, chat_request(Some(key), &body)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let uri = format!("/api/agents/{}/statistics", agent["id"].as_str().unwrap());
    let (status, json) = send_json(&app, owner_request("GET", &uri, OWNER_TOKEN, None)).await;
    assert_eq!(status, StatusCode::OK);
    let stats = &json["statistics"];
    assert_eq!(stats["total_conversations"], 2);
    assert_eq!(stats["total_messages"], 4);
    assert_eq!(stats["user_messages"], 2);
    assert_eq!(stats["assistant_messages"], 2);
    assert_eq!(stats["total_tokens_used"], 14);
}

// ===========================================================================
// TEST 12: widget snippet and script
// ===========================================================================
#[tokio::test]
async fn test_widget_snippet_and_script() {
    let app = make_app();
    let agent = create_agent(&app, json!({ "name": "Embed Me" })).await;

    let uri = format!("/api/agents/{}/widget", agent["id"].as_str().unwrap());
    let (status, json) = send_json(&app, owner_request("GET", &uri, OWNER_TOKEN, None)).await;
    assert_eq!(status, StatusCode::OK);
    let snippet = json["snippet"].as_str().unwrap();
    assert!(snippet.contains("https://parley.example/api/widget/chat"));
    assert!(snippet.contains("https://parley.example/widget.js"));
    assert!(snippet.contains(agent["api_key"].as_str().unwrap()));

    let req = Request::builder().uri("/widget.js").body(Body::empty()).unwrap();
    let (status, headers, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers["content-type"]
        .to_str()
        .unwrap()
        .starts_with("application/javascript"));
    let script = String::from_utf8(body).unwrap();
    assert!(script.contains("ParleyWidget"));
    assert!(script.contains("x-agent-api-key"));
    assert!(script.contains("window.location.href"));
    assert!(script.contains("userAgent: navigator.userAgent"));
}
