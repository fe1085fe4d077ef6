use thiserror::Error;

use crate::identity::IdentityError;
use crate::inference::InferenceError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Inference client error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Identity client error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Other error: {0}")]
    Other(String),
}

/// Request-level failure taxonomy shared by every HTTP-facing operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    NotFound(String),

    /// Store or provider failure.
    #[error("{0}")]
    Dependency(String),

    /// Provider rate limiting, surfaced separately from other dependency failures.
    #[error("{0}")]
    TooManyRequests(String),
}

impl ServiceError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::Dependency(msg.into())
    }

    /// HTTP status code for this error kind.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::Unauthenticated(_) => 401,
            Self::NotFound(_) => 404,
            Self::TooManyRequests(_) => 429,
            Self::Dependency(_) => 500,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        tracing::debug!(error = %e, "Store error reported as a generic dependency failure");
        Self::Dependency("Storage failure".to_string())
    }
}

impl From<InferenceError> for ServiceError {
    fn from(e: InferenceError) -> Self {
        match e {
            InferenceError::RateLimited { .. } => Self::TooManyRequests(
                "The language model quota was exceeded. Please try again in a few moments."
                    .to_string(),
            ),
            other => Self::Dependency(format!("Language model provider error: {}", other)),
        }
    }
}

impl From<IdentityError> for ServiceError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::InvalidToken => Self::Unauthenticated("Unauthorized".to_string()),
            other => Self::Dependency(format!("Identity provider error: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ServiceError::invalid("x").status_code(), 400);
        assert_eq!(ServiceError::unauthenticated("x").status_code(), 401);
        assert_eq!(ServiceError::not_found("x").status_code(), 404);
        assert_eq!(ServiceError::dependency("x").status_code(), 500);
        assert_eq!(ServiceError::TooManyRequests("x".into()).status_code(), 429);
    }

    #[test]
    fn test_rate_limit_maps_to_too_many_requests() {
        let err: ServiceError = InferenceError::RateLimited {
            message: "slow down".to_string(),
        }
        .into();
        assert_eq!(err.status_code(), 429);
    }

    #[test]
    fn test_other_provider_errors_map_to_dependency() {
        let err: ServiceError = InferenceError::Api {
            code: 503,
            message: "overloaded".to_string(),
        }
        .into();
        assert!(matches!(err, ServiceError::Dependency(_)));
        assert!(err.to_string().contains("overloaded"));
    }

    #[test]
    fn test_store_error_maps_to_dependency() {
        let err: ServiceError = StoreError::Unavailable("host db-7 refused".to_string()).into();
        assert_eq!(err, ServiceError::dependency("Storage failure"));
        assert!(!err.to_string().contains("db-7"));
    }

    #[test]
    fn test_invalid_token_maps_to_unauthenticated() {
        let err: ServiceError = IdentityError::InvalidToken.into();
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn test_missing_api_key_is_a_startup_error() {
        let err: ParleyError = InferenceError::MissingApiKey.into();
        assert!(matches!(err, ParleyError::Inference(_)));
        assert!(err.to_string().starts_with("Inference client error"));
    }
}
