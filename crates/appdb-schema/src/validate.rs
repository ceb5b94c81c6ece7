use std::sync::Arc;

use tracing::debug;

use appdb_types::{AppId, Fields, ModelName, Value};

use crate::error::{SchemaError, SchemaResult};
use crate::model::ValidatedFields;
use crate::registry::SchemaRegistry;

/// The write-path gate.
///
/// Resolves the model through the registry, runs its predicate, and on
/// success hands back [`ValidatedFields`], the only form in which a value
/// may reach a storage backend.
#[derive(Clone)]
pub struct Validator {
    registry: Arc<dyn SchemaRegistry>,
}

impl Validator {
    pub fn new(registry: Arc<dyn SchemaRegistry>) -> Self {
        Self { registry }
    }

    /// Validate `value` as an instance of `model` in `app`.
    ///
    /// A registry failure is returned as-is (see
    /// [`SchemaError::is_resolution`]); a rejection is
    /// [`SchemaError::Invalid`] carrying the model name and the value.
    pub async fn validate(
        &self,
        app: &AppId,
        model: &ModelName,
        value: Fields,
    ) -> SchemaResult<ValidatedFields> {
        let definition = self.registry.resolve_model(app, model).await?;

        match definition.validate(&value) {
            Ok(()) => Ok(ValidatedFields::new(value)),
            Err(reasons) => {
                debug!(app = %app, model = %model, violations = reasons.len(), "value rejected");
                Err(SchemaError::Invalid {
                    model: model.clone(),
                    value: Value::Object(value),
                    reasons,
                })
            }
        }
    }
}
