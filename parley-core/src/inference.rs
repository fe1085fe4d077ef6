//! Inference module: chat completion providers
//!
//! Provides an `InferenceProvider` trait with one network implementation:
//! - **Mistral**: `POST {base_url}/v1/chat/completions`
//!
//! Calls are made exactly once. Rate limiting (HTTP 429) is reported as its own
//! error variant so callers can surface it distinctly.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::InferenceConfig;

// ============================================================================
// InferenceProvider trait
// ============================================================================

/// Abstraction over text-completion services.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Run one completion. No retries are performed.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, InferenceError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limit exceeded: {message}")]
    RateLimited { message: String },

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing API key")]
    MissingApiKey,
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Serialized as-is as the chat completion request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<PromptMessage>,
    pub temperature: f32,
    pub max_tokens: i32,
    pub top_p: f32,
}

/// Reply content: either a plain string or a list of fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Fragments(Vec<ContentFragment>),
    Other(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentFragment {
    Text(String),
    Chunk { text: String },
    Other(serde_json::Value),
}

impl ContentFragment {
    fn text(&self) -> &str {
        match self {
            Self::Text(s) => s,
            Self::Chunk { text } => text,
            Self::Other(_) => "",
        }
    }
}

impl MessageContent {
    /// Concatenated text. Fragments without a text field contribute nothing.
    pub fn extract_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Fragments(fragments) => fragments.iter().map(ContentFragment::text).collect(),
            Self::Other(_) => String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: Option<MessageContent>,
    pub total_tokens: Option<u32>,
}

// ============================================================================
// Mistral API structs (private)
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<MessageContent>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MistralErrorResponse {
    message: Option<serde_json::Value>,
}

// ============================================================================
// MistralClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct MistralConfig {
    pub api_key: String,
    pub base_url: String,
    /// Overall request timeout; `None` leaves the call unbounded.
    pub timeout: Option<Duration>,
}

impl MistralConfig {
    /// Build from `[inference]`, taking the key from `MISTRAL_API_KEY` unless given.
    pub fn new(api_key: Option<String>, config: &InferenceConfig) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("MISTRAL_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout_seconds.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MistralClient {
    client: Client,
    config: MistralConfig,
}

impl MistralClient {
    pub fn new(config: MistralConfig) -> Result<Self, InferenceError> {
        if config.api_key.is_empty() {
            return Err(InferenceError::MissingApiKey);
        }

        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self { client, config })
    }

    /// Create a client with a custom base URL (for testing / self-hosted gateways)
    pub fn with_base_url(mut config: MistralConfig, base_url: String) -> Result<Self, InferenceError> {
        config.base_url = base_url;
        Self::new(config)
    }
}

#[async_trait]
impl InferenceProvider for MistralClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, InferenceError> {
        let url = format!("{}/v1/chat/completions", self.config.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<MistralErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.message)
                .map(|m| match m {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .unwrap_or(error_body);

            tracing::error!(code = status.as_u16(), message = %message, model = %request.model, "Mistral API error");

            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(InferenceError::RateLimited { message });
            }
            return Err(InferenceError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let body: ChatCompletionResponse = response.json().await?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content);

        Ok(Completion {
            content,
            total_tokens: body.usage.and_then(|u| u.total_tokens),
        })
    }

    fn name(&self) -> &str {
        "mistral"
    }
}

// ============================================================================
// TESTS
// ============================================================================
