use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use appdb_docs::DocError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid value for model {model}: {}", .reasons.join("; "))]
    Validation {
        model: String,
        value: Value,
        reasons: Vec<String>,
    },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("schema resolution failed: {0}")]
    SchemaResolution(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation { .. } | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::SchemaResolution(_) => StatusCode::BAD_GATEWAY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Storage(_) | Self::Config(_) | Self::Io(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<DocError> for ServerError {
    fn from(e: DocError) -> Self {
        match e {
            DocError::NotFound(key) => Self::NotFound(key.to_string()),
            DocError::Validation {
                model,
                value,
                reasons,
            } => Self::Validation {
                model: model.to_string(),
                value,
                reasons,
            },
            DocError::SchemaResolution(e) => Self::SchemaResolution(e.to_string()),
            DocError::Storage(e) => Self::Storage(e.to_string()),
            e @ DocError::Computation { .. } => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(%status, error = %self, "request failed");
        }

        let body = match self {
            Self::Validation {
                ref model,
                ref value,
                ref reasons,
            } => json!({
                "error": self.to_string(),
                "model": model,
                "value": value,
                "reasons": reasons,
            }),
            ref other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
