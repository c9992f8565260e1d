//! Error types for Inbox Assist.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors from a single transport attempt.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} returned HTTP {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} timed out")]
    Timeout { provider: String },

    #[error("Provider {provider} unreachable: {reason}")]
    Unreachable { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Model {model} not available on provider {provider}")]
    ModelNotAvailable { provider: String, model: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

impl LlmError {
    /// Map a transport error from reqwest onto the provider error space.
    pub fn from_reqwest(provider: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout {
                provider: provider.to_string(),
            }
        } else if err.is_connect() {
            LlmError::Unreachable {
                provider: provider.to_string(),
                reason: err.to_string(),
            }
        } else if err.is_decode() {
            LlmError::InvalidResponse {
                provider: provider.to_string(),
                reason: err.to_string(),
            }
        } else {
            LlmError::RequestFailed {
                provider: provider.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

/// The explicit "no result" value returned by the provider client once its
/// retry budget is spent or a failure is not retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionFailure {
    /// The configured backend could not be reached at all.
    #[error("LLM service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("LLM request failed: {0}")]
    Failed(String),
}

/// Processing pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Email {0} not found")]
    EmailNotFound(i64),

    #[error("Categorization failed: {0}")]
    Categorization(String),

    #[error("Missing prompt template: {0}")]
    MissingTemplate(String),

    #[error("Persisting results failed: {0}")]
    Persist(String),

    #[error("Processing panicked: {0}")]
    Panicked(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Inbox ingestion errors.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to read inbox file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Malformed inbox file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

pub type Result<T> = std::result::Result<T, Error>;
