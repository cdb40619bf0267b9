use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Main error type for cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Cache store operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Memory limit exceeded")]
    MemoryLimitExceeded,

    #[error("Invalid TTL: {0}")]
    TTLInvalid(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Unknown policy: {0}")]
    UnknownPolicy(String),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::StoreUnavailable(_) | Self::Backend(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::MemoryLimitExceeded => StatusCode::INSUFFICIENT_STORAGE,
            Self::TTLInvalid(_) | Self::InvalidPattern(_) | Self::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::UnknownPolicy(_) => StatusCode::NOT_FOUND,
            Self::InvalidPolicy(_) | Self::SerializationError(_) | Self::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            Self::StoreUnavailable(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}

/// Implement IntoResponse for Axum integration
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "code": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
