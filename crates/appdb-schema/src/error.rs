use appdb_types::{AppId, ModelName, Value};

/// Errors from model resolution and validation.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The app's manifest could not be obtained.
    #[error("failed to resolve app {app}: {reason}")]
    Resolution { app: AppId, reason: String },

    /// The manifest was obtained but declares no such model.
    #[error("app {app} declares no model {model}")]
    UnknownModel { app: AppId, model: ModelName },

    /// A candidate value was rejected by the model.
    #[error("invalid value {value} for model {model}: {}", .reasons.join("; "))]
    Invalid {
        model: ModelName,
        value: Value,
        reasons: Vec<String>,
    },

    /// A computed field shares its name with a declared field.
    #[error("model {model}: computed field {field} collides with a declared field")]
    ComputedFieldCollision { model: ModelName, field: String },

    /// A field or computed field is declared twice.
    #[error("model {model}: {field} is declared more than once")]
    DuplicateField { model: ModelName, field: String },

    /// The manifest document itself is malformed.
    #[error("invalid manifest for {app}: {reason}")]
    Manifest { app: AppId, reason: String },
}

impl SchemaError {
    pub fn resolution(app: &AppId, reason: impl Into<String>) -> Self {
        Self::Resolution {
            app: app.clone(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for failures to obtain a usable definition, as opposed
    /// to a definition rejecting a value.
    pub fn is_resolution(&self) -> bool {
        !matches!(self, Self::Invalid { .. })
    }
}

/// Result alias for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;
