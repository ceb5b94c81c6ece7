use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use appdb_types::{Fields, ModelName, Value};

/// A pure function of a persisted value producing one derived value.
pub trait Derivation: Send + Sync {
    fn derive(&self, value: &Fields) -> Result<Value, String>;
}

impl<F> Derivation for F
where
    F: Fn(&Fields) -> Result<Value, String> + Send + Sync,
{
    fn derive(&self, value: &Fields) -> Result<Value, String> {
        self(value)
    }
}

/// Named computed-field derivations of a model, iterated in name order.
#[derive(Clone, Default)]
pub struct ComputedFields {
    fields: BTreeMap<String, Arc<dyn Derivation>>,
}

impl ComputedFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a derivation. Returns `false` if the name was already taken,
    /// in which case the existing derivation is kept.
    pub fn insert(&mut self, name: impl Into<String>, derivation: Arc<dyn Derivation>) -> bool {
        let name = name.into();
        if self.fields.contains_key(&name) {
            return false;
        }
        self.fields.insert(name, derivation);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Derivation>> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn Derivation)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Debug for ComputedFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.fields.keys()).finish()
    }
}

/// The capability an app model exposes to the document store.
///
/// Implementations must be thread-safe; a single definition is shared by
/// every request touching the model.
pub trait ModelDefinition: Send + Sync {
    /// The model's name within its app.
    fn name(&self) -> &ModelName;

    /// Check a candidate value. On rejection, return every violation found.
    fn validate(&self, value: &Fields) -> Result<(), Vec<String>>;

    /// Derivations overlaid on the value when a document is read.
    fn computed_fields(&self) -> &ComputedFields;
}

/// A value that has passed its model's validation.
///
/// Storage backends accept only this type, so an unvalidated value cannot
/// reach persistence. Only [`crate::Validator`] constructs it.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedFields {
    fields: Fields,
}

impl ValidatedFields {
    pub(crate) fn new(fields: Fields) -> Self {
        Self { fields }
    }

    /// Bypass validation. Only for backend tests.
    #[cfg(any(test, feature = "test-util"))]
    pub fn unchecked(fields: Fields) -> Self {
        Self { fields }
    }

    pub fn as_fields(&self) -> &Fields {
        &self.fields
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }
}

impl AsRef<Fields> for ValidatedFields {
    fn as_ref(&self) -> &Fields {
        &self.fields
    }
}
