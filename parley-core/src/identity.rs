//! Dashboard user identity.
//!
//! The dashboard API never manages sessions itself. It forwards the caller's
//! bearer token to a GoTrue-compatible auth server (`GET {base_url}/user`) and
//! uses the returned user id as the owner scope for agent records.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::AuthConfig;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a session token to the authenticated user's id.
    async fn authenticate(&self, token: &str) -> Result<Uuid, IdentityError>;
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid or expired session token")]
    InvalidToken,

    #[error("Auth server error ({code}): {message}")]
    Api { code: u16, message: String },
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: Uuid,
}

#[derive(Debug, Clone)]
pub struct HttpIdentityProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpIdentityProvider {
    /// `api_key` is sent as the `apikey` header when present (`PARLEY_AUTH_API_KEY`).
    pub fn new(config: &AuthConfig, api_key: Option<String>) -> Result<Self, IdentityError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.or_else(|| std::env::var("PARLEY_AUTH_API_KEY").ok()),
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<Uuid, IdentityError> {
        let url = format!("{}/user", self.base_url);
        let mut request = self.client.get(&url).bearer_auth(token);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(IdentityError::InvalidToken);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::error!(code = status.as_u16(), message = %message, "Auth server error");
            return Err(IdentityError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let user: UserResponse = response.json().await?;
        Ok(user.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: String) -> HttpIdentityProvider {
        HttpIdentityProvider::new(
            &AuthConfig {
                base_url,
                timeout_seconds: 5,
            },
            Some("anon-key".to_string()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_authenticate_returns_user_id() {
        let mock_server = MockServer::start().await;
        let user_id = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path("/user"))
            .and(header("authorization", "Bearer session-token"))
            .and(header("apikey", "anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": user_id,
                "email": "owner@example.com",
                "aud": "authenticated"
            })))
            .mount(&mock_server)
            .await;

        let id = provider(mock_server.uri()).authenticate("session-token").await.unwrap();
        assert_eq!(id, user_id);
    }

    #[tokio::test]
    async fn test_authenticate_rejects_unauthorized() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "msg": "invalid JWT"
            })))
            .mount(&mock_server)
            .await;

        let result = provider(mock_server.uri()).authenticate("expired").await;
        assert!(matches!(result, Err(IdentityError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_authenticate_surfaces_server_errors() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&mock_server)
            .await;

        match provider(mock_server.uri()).authenticate("t").await {
            Err(IdentityError::Api { code, message }) => {
                assert_eq!(code, 503);
                assert_eq!(message, "maintenance");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }
}
