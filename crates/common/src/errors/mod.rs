//! Error types for KBQA services
//!
//! Provides a single error taxonomy shared by the answering core and the
//! transport layer:
//! - Distinct variants for corpus, embedding and generation failures
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,

    // Rate limiting (6xxx)
    RateLimited,

    // Knowledge source errors (7xxx)
    CorpusUnavailable,

    // Model boundary errors (8xxx)
    EmbeddingFailure,
    GenerationFailure,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,

            ErrorCode::RateLimited => 6001,

            ErrorCode::CorpusUnavailable => 7001,

            ErrorCode::EmbeddingFailure => 8001,
            ErrorCode::GenerationFailure => 8002,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    /// The knowledge corpus could not be read. Fatal until the source is fixed.
    #[error("Corpus unavailable at {source_path}: {message}")]
    CorpusUnavailable { source_path: String, message: String },

    /// The embedding model was unreachable or returned a malformed result.
    #[error("Embedding failure: {message}")]
    EmbeddingFailure { message: String },

    /// The language model call failed (timeout, rate limit, malformed response).
    #[error("Generation failure: {message}")]
    GenerationFailure { message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn embedding(message: impl Into<String>) -> Self {
        AppError::EmbeddingFailure {
            message: message.into(),
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        AppError::GenerationFailure {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>, field: Option<&str>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: field.map(str::to_string),
        }
    }

    /// Copy of this error for handing the same failure to several callers.
    /// Wrapped foreign errors become `Internal` with their message.
    pub fn duplicate(&self) -> Self {
        match self {
            AppError::Validation { message, field } => AppError::Validation {
                message: message.clone(),
                field: field.clone(),
            },
            AppError::RateLimited { limit } => AppError::RateLimited { limit: *limit },
            AppError::CorpusUnavailable {
                source_path,
                message,
            } => AppError::CorpusUnavailable {
                source_path: source_path.clone(),
                message: message.clone(),
            },
            AppError::EmbeddingFailure { message } => AppError::embedding(message.clone()),
            AppError::GenerationFailure { message } => AppError::generation(message.clone()),
            AppError::Internal { message } => AppError::Internal {
                message: message.clone(),
            },
            AppError::Configuration { message } => AppError::Configuration {
                message: message.clone(),
            },
            AppError::Serialization(_) | AppError::Other(_) => AppError::Internal {
                message: self.to_string(),
            },
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::CorpusUnavailable { .. } => ErrorCode::CorpusUnavailable,
            AppError::EmbeddingFailure { .. } => ErrorCode::EmbeddingFailure,
            AppError::GenerationFailure { .. } => ErrorCode::GenerationFailure,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::EmbeddingFailure { .. } | AppError::GenerationFailure { .. } => {
                StatusCode::BAD_GATEWAY
            }

            // 503 Service Unavailable
            AppError::CorpusUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let field = match &self {
            AppError::Validation { field, .. } => field.clone(),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                field,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
