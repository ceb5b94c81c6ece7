use appdb_schema::{ComputeFailure, SchemaError};
use appdb_store::StoreError;
use appdb_types::{DocumentKey, ModelName, Value};

/// Errors from document store operations.
#[derive(Debug, thiserror::Error)]
pub enum DocError {
    /// No document exists at the key.
    #[error("document not found: {0}")]
    NotFound(DocumentKey),

    /// The model rejected the value. Nothing was written.
    #[error("invalid value {value} for model {model}: {}", .reasons.join("; "))]
    Validation {
        model: ModelName,
        value: Value,
        reasons: Vec<String>,
    },

    /// The model could not be resolved. Nothing was written.
    #[error("schema resolution failed: {0}")]
    SchemaResolution(SchemaError),

    /// The storage backend failed.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Computed fields could not be derived and the caller asked for a
    /// complete document.
    #[error("computed fields failed for {key}: {}", render(.failures))]
    Computation {
        key: DocumentKey,
        failures: Vec<ComputeFailure>,
    },
}

fn render(failures: &[ComputeFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<SchemaError> for DocError {
    fn from(e: SchemaError) -> Self {
        match e {
            SchemaError::Invalid {
                model,
                value,
                reasons,
            } => Self::Validation {
                model,
                value,
                reasons,
            },
            other => Self::SchemaResolution(other),
        }
    }
}

/// Result alias for document store operations.
pub type DocResult<T> = Result<T, DocError>;
