//! Error types shared across the pipeline, grading, and HTTP layers

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias using our error type
pub type Result<T> = std::result::Result<T, Error>;

/// All errors the service can produce
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// The uploaded file's format is not supported
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The uploaded bytes could not be read as the declared format
    #[error("Corrupt input: {0}")]
    CorruptInput(String),

    /// Text generation call failed
    #[error("Generation error: {0}")]
    Generation(String),

    /// Generated payload did not match the required schema
    #[error("Schema validation failed: {0}")]
    SchemaValidation(String),

    /// Embedding call failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Blob store operation failed
    #[error("Blob store error: {0}")]
    Blob(String),

    /// Submission is missing answers for one or more questions
    #[error("Incomplete submission: {0}")]
    IncompleteSubmission(String),

    /// The attempt was already graded
    #[error("Attempt already submitted")]
    AlreadySubmitted,

    /// Quiz generation has not produced a quiz for this module
    #[error("Quiz not ready: {0}")]
    QuizNotReady(String),

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Pipeline stage failed
    #[error("Stage {stage} failed: {message}")]
    Stage { stage: String, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Catch-all internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn unsupported_format(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    pub fn corrupt_input(msg: impl Into<String>) -> Self {
        Self::CorruptInput(msg.into())
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    pub fn schema_validation(msg: impl Into<String>) -> Self {
        Self::SchemaValidation(msg.into())
    }

    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn blob(msg: impl Into<String>) -> Self {
        Self::Blob(msg.into())
    }

    pub fn incomplete_submission(msg: impl Into<String>) -> Self {
        Self::IncompleteSubmission(msg.into())
    }

    pub fn quiz_not_ready(msg: impl Into<String>) -> Self {
        Self::QuizNotReady(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn stage(stage: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True for extraction failures that must fail the document permanently
    pub fn is_fatal_for_document(&self) -> bool {
        matches!(self, Self::UnsupportedFormat(_) | Self::CorruptInput(_))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Error::UnsupportedFormat(_) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_format"),
            Error::CorruptInput(_) => (StatusCode::UNPROCESSABLE_ENTITY, "corrupt_input"),
            Error::IncompleteSubmission(_) => (StatusCode::BAD_REQUEST, "incomplete_submission"),
            Error::AlreadySubmitted => (StatusCode::CONFLICT, "already_submitted"),
            Error::QuizNotReady(_) => (StatusCode::CONFLICT, "quiz_not_ready"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::Generation(_) | Error::SchemaValidation(_) | Error::Embedding(_) => {
                (StatusCode::BAD_GATEWAY, "upstream_error")
            }
            Error::Http(_) => (StatusCode::BAD_GATEWAY, "http_error"),
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
