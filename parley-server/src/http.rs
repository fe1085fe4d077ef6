//! Parley HTTP API
//!
//! Axum-based HTTP server for the public widget endpoint and the owner-facing
//! agent management API.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to an
//! inner function returning `(StatusCode, serde_json::Value)`. The inner
//! functions are directly testable without axum dispatch machinery.
//!
//! Endpoints:
//! - GET     /health                      health check with store status
//! - GET     /version                     server version info
//! - POST    /api/widget/chat             widget chat turn (`x-agent-api-key`)
//! - OPTIONS /api/widget/chat             CORS preflight
//! - GET     /widget.js                   embeddable widget script
//! - GET     /api/agents                  list the caller's agents
//! - POST    /api/agents                  create an agent
//! - GET     /api/agents/:id              fetch one agent
//! - PATCH   /api/agents/:id              update an agent
//! - DELETE  /api/agents/:id              delete an agent and its history
//! - GET     /api/agents/:id/statistics   usage statistics
//! - GET     /api/agents/:id/widget       embeddable snippet

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE,
};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use parley_core::config::{HttpConfig, WidgetConfig};
use parley_core::models::{Agent, AgentPatch, AgentStatistics, CreateAgentInput};
use parley_core::{
    HttpIdentityProvider, IdentityError, IdentityProvider, InferenceProvider, MistralClient,
    MistralConfig, ParleyConfig, ParleyError, PgStore, ServiceError, Store,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::subsystems::chat::{self, ChatRequest};
use crate::subsystems::{agents, snippet};

/// Header carrying the agent credential on widget requests.
pub const AGENT_KEY_HEADER: &str = "x-agent-api-key";

const WIDGET_JS: &str = include_str!("../assets/widget.js");

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub store: Arc<dyn Store>,
    pub inference: Arc<dyn InferenceProvider>,
    pub identity: Arc<dyn IdentityProvider>,
    pub widget: WidgetConfig,
}

impl HttpState {
    /// Wire the production adapters: PostgreSQL store, Mistral client and the
    /// HTTP identity provider. Secrets come from the environment.
    pub fn from_config(pool: PgPool, config: &ParleyConfig) -> Result<Self, ParleyError> {
        let inference = MistralClient::new(MistralConfig::new(None, &config.inference))?;
        let identity = HttpIdentityProvider::new(&config.auth, None)?;

        Ok(Self {
            store: Arc::new(PgStore::new(pool)),
            inference: Arc::new(inference),
            identity: Arc::new(identity),
            widget: config.widget.clone(),
        })
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/widget.js", get(widget_js_handler))
        .route(
            "/api/widget/chat",
            post(widget_chat_handler).options(widget_chat_preflight),
        )
        .route("/api/agents", get(list_agents_handler).post(create_agent_handler))
        .route(
            "/api/agents/:id",
            get(get_agent_handler)
                .patch(update_agent_handler)
                .delete(delete_agent_handler),
        )
        .route("/api/agents/:id/statistics", get(agent_statistics_handler))
        .route("/api/agents/:id/widget", get(agent_widget_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    http: &HttpConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", http.host, http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Parley HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Response helpers
// ============================================================================

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }
}

/// Map a service error onto its status code and the standard error body.
pub fn error_body(err: &ServiceError) -> (StatusCode, serde_json::Value) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, serde_json::json!(ErrorResponse::new(err.to_string())))
}

fn reply<T: Serialize>(
    status: StatusCode,
    key: &str,
    result: Result<T, ServiceError>,
) -> (StatusCode, serde_json::Value) {
    match result {
        Ok(value) => {
            let mut body = serde_json::Map::new();
            body.insert(key.to_string(), serde_json::json!(value));
            (status, serde_json::Value::Object(body))
        }
        Err(e) => error_body(&e),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ServiceError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(error = %e, "Rejected malformed request body");
        ServiceError::invalid("Request body must be a valid JSON object")
    })
}

fn parse_agent_id(raw: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(raw).map_err(|_| ServiceError::not_found("Agent not found"))
}

async fn authenticate(state: &HttpState, token: Option<&str>) -> Result<Uuid, ServiceError> {
    let token = token.ok_or_else(|| ServiceError::unauthenticated("Unauthorized"))?;
    state.identity.authenticate(token).await.map_err(|e| {
        if !matches!(e, IdentityError::InvalidToken) {
            tracing::error!(error = %e, "Identity provider failure");
        }
        ServiceError::from(e)
    })
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check — queries the store and returns (status_code, json_body).
pub async fn health_inner(store: &dyn Store) -> (StatusCode, serde_json::Value) {
    match store.health().await {
        Ok(backend) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "store": backend,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version — returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "parley/1",
    })
}

/// Inner widget chat. A missing credential wins over a malformed body.
///
/// The pipeline runs on its own task so a client disconnect cannot cut it
/// short between the user message and the assistant message being stored.
pub async fn widget_chat_inner(
    state: &HttpState,
    credential: Option<String>,
    body: &[u8],
) -> (StatusCode, serde_json::Value) {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        ChatRequest::default()
    } else {
        match parse_json::<ChatRequest>(body) {
            Ok(request) => request,
            Err(e) => {
                let err = chat::require_credential(credential.as_deref()).err().unwrap_or(e);
                return error_body(&err);
            }
        }
    };

    let store = Arc::clone(&state.store);
    let inference = Arc::clone(&state.inference);
    let task = tokio::spawn(async move {
        chat::handle(&*store, &*inference, credential.as_deref(), request).await
    });

    match task.await {
        Ok(Ok(reply)) => (StatusCode::OK, serde_json::json!(reply)),
        Ok(Err(e)) => error_body(&e),
        Err(e) => {
            tracing::error!(error = %e, "Chat task did not complete");
            error_body(&ServiceError::dependency("Internal server error"))
        }
    }
}

pub async fn list_agents_inner(
    state: &HttpState,
    token: Option<&str>,
) -> (StatusCode, serde_json::Value) {
    let result: Result<Vec<Agent>, ServiceError> = async {
        let owner = authenticate(state, token).await?;
        agents::list(&*state.store, owner).await
    }
    .await;
    reply(StatusCode::OK, "agents", result)
}

pub async fn create_agent_inner(
    state: &HttpState,
    token: Option<&str>,
    body: &[u8],
) -> (StatusCode, serde_json::Value) {
    let result: Result<Agent, ServiceError> = async {
        let owner = authenticate(state, token).await?;
        let input: CreateAgentInput = parse_json(body)?;
        agents::create(&*state.store, owner, input).await
    }
    .await;
    reply(StatusCode::CREATED, "agent", result)
}

pub async fn get_agent_inner(
    state: &HttpState,
    token: Option<&str>,
    id: &str,
) -> (StatusCode, serde_json::Value) {
    let result: Result<Agent, ServiceError> = async {
        let owner = authenticate(state, token).await?;
        agents::get(&*state.store, owner, parse_agent_id(id)?).await
    }
    .await;
    reply(StatusCode::OK, "agent", result)
}

pub async fn update_agent_inner(
    state: &HttpState,
    token: Option<&str>,
    id: &str,
    body: &[u8],
) -> (StatusCode, serde_json::Value) {
    let result: Result<Agent, ServiceError> = async {
        let owner = authenticate(state, token).await?;
        let patch: AgentPatch = parse_json(body)?;
        agents::update(&*state.store, owner, parse_agent_id(id)?, patch).await
    }
    .await;
    reply(StatusCode::OK, "agent", result)
}

pub async fn delete_agent_inner(
    state: &HttpState,
    token: Option<&str>,
    id: &str,
) -> (StatusCode, serde_json::Value) {
    let result: Result<bool, ServiceError> = async {
        let owner = authenticate(state, token).await?;
        agents::delete(&*state.store, owner, parse_agent_id(id)?).await?;
        Ok(true)
    }
    .await;
    reply(StatusCode::OK, "success", result)
}

pub async fn agent_statistics_inner(
    state: &HttpState,
    token: Option<&str>,
    id: &str,
) -> (StatusCode, serde_json::Value) {
    let result: Result<AgentStatistics, ServiceError> = async {
        let owner = authenticate(state, token).await?;
        agents::statistics(&*state.store, owner, parse_agent_id(id)?).await
    }
    .await;
    reply(StatusCode::OK, "statistics", result)
}

pub async fn agent_widget_inner(
    state: &HttpState,
    token: Option<&str>,
    id: &str,
) -> (StatusCode, serde_json::Value) {
    let result: Result<String, ServiceError> = async {
        let owner = authenticate(state, token).await?;
        let agent = agents::get(&*state.store, owner, parse_agent_id(id)?).await?;
        Ok(snippet::render(&state.widget, &agent))
    }
    .await;
    reply(StatusCode::OK, "snippet", result)
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&*state.store).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn widget_js_handler() -> impl IntoResponse {
    (
        [
            (CONTENT_TYPE, "application/javascript; charset=utf-8"),
            (CACHE_CONTROL, "public, max-age=300"),
        ],
        WIDGET_JS,
    )
}

pub async fn widget_chat_preflight() -> impl IntoResponse {
    (
        StatusCode::OK,
        [
            (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"),
            (ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type, x-agent-api-key"),
        ],
    )
}

pub async fn widget_chat_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let credential = header_value(&headers, AGENT_KEY_HEADER);
    let (status, body) = widget_chat_inner(&state, credential, &body).await;
    (status, [(ACCESS_CONTROL_ALLOW_ORIGIN, "*")], Json(body))
}

pub async fn list_agents_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = bearer_token(&headers);
    let (status, body) = list_agents_inner(&state, token.as_deref()).await;
    (status, Json(body))
}

pub async fn create_agent_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let token = bearer_token(&headers);
    let (status, body) = create_agent_inner(&state, token.as_deref(), &body).await;
    (status, Json(body))
}

pub async fn get_agent_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = bearer_token(&headers);
    let (status, body) = get_agent_inner(&state, token.as_deref(), &id).await;
    (status, Json(body))
}

pub async fn update_agent_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let token = bearer_token(&headers);
    let (status, body) = update_agent_inner(&state, token.as_deref(), &id, &body).await;
    (status, Json(body))
}

pub async fn delete_agent_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = bearer_token(&headers);
    let (status, body) = delete_agent_inner(&state, token.as_deref(), &id).await;
    (status, Json(body))
}

pub async fn agent_statistics_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = bearer_token(&headers);
    let (status, body) = agent_statistics_inner(&state, token.as_deref(), &id).await;
    (status, Json(body))
}

pub async fn agent_widget_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = bearer_token(&headers);
    let (status, body) = agent_widget_inner(&state, token.as_deref(), &id).await;
    (status, Json(body))
}

// ============================================================================
// Unit Tests — call inner functions directly
// ============================================================================
