//! Declarative model definitions.
//!
//! A manifest describes each model as a list of typed fields plus a list of
//! computed fields. [`ModelSpec`] is that description as it appears on the
//! wire; [`ModelSchema`] is the checked, executable [`ModelDefinition`]
//! built from it (or assembled in code with [`ModelSchema::builder`]).

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Number;

use appdb_types::{Fields, ModelName, Value};

use crate::error::{SchemaError, SchemaResult};
use crate::model::{ComputedFields, Derivation, ModelDefinition};

/// JSON shape a declared field must have.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    #[default]
    Any,
}

impl FieldKind {
    /// Returns `true` if `value` has this shape. `null` matches nothing but
    /// [`FieldKind::Any`].
    pub fn admits(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        };
        f.write_str(s)
    }
}

/// A declared field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
}

/// Declarative derivations available to manifests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum DerivationSpec {
    /// Join the scalar renderings of `fields` with `separator`. Missing and
    /// null fields render as the empty string.
    Concat {
        fields: Vec<String>,
        #[serde(default = "default_separator")]
        separator: String,
    },
    /// Numeric sum of `fields`; every field must be present and numeric.
    Sum { fields: Vec<String> },
    /// Length of an array, string (in chars), or object field.
    Length { field: String },
}

fn default_separator() -> String {
    " ".into()
}

impl Derivation for DerivationSpec {
    fn derive(&self, value: &Fields) -> Result<Value, String> {
        match self {
            Self::Concat { fields, separator } => {
                let mut parts = Vec::with_capacity(fields.len());
                for name in fields {
                    let part = match value.get(name) {
                        None | Some(Value::Null) => String::new(),
                        Some(Value::String(s)) => s.clone(),
                        Some(v @ (Value::Number(_) | Value::Bool(_))) => v.to_string(),
                        Some(_) => return Err(format!("field {name} is not a scalar")),
                    };
                    parts.push(part);
                }
                Ok(Value::String(parts.join(separator)))
            }
            Self::Sum { fields } => sum_fields(value, fields),
            Self::Length { field } => match value.get(field) {
                Some(Value::Array(a)) => Ok(Value::from(a.len())),
                Some(Value::String(s)) => Ok(Value::from(s.chars().count())),
                Some(Value::Object(o)) => Ok(Value::from(o.len())),
                Some(_) => Err(format!("field {field} has no length")),
                None => Err(format!("field {field} is missing")),
            },
        }
    }
}

/// Integer sum while every operand is an integer, float sum otherwise.
fn sum_fields(value: &Fields, fields: &[String]) -> Result<Value, String> {
    let mut int_total: Option<i64> = Some(0);
    let mut float_total = 0f64;

    for name in fields {
        let n = match value.get(name) {
            Some(Value::Number(n)) => n,
            Some(_) => return Err(format!("field {name} is not a number")),
            None => return Err(format!("field {name} is missing")),
        };
        int_total = match (int_total, n.as_i64()) {
            (Some(acc), Some(i)) => acc.checked_add(i),
            _ => None,
        };
        float_total += n.as_f64().unwrap_or(f64::NAN);
    }

    match int_total {
        Some(total) => Ok(Value::from(total)),
        None => Number::from_f64(float_total)
            .map(Value::Number)
            .ok_or_else(|| "sum is not a finite number".to_string()),
    }
}

/// A named computed field as declared in a manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedSpec {
    pub name: String,
    #[serde(flatten)]
    pub derivation: DerivationSpec,
}

/// A model as declared in a manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: ModelName,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub computed: Vec<ComputedSpec>,
    /// Accept fields the model does not declare.
    #[serde(default)]
    pub allow_extra: bool,
}

impl ModelSpec {
    /// Check the declaration and build the executable definition.
    pub fn build(self) -> SchemaResult<ModelSchema> {
        let mut builder = ModelSchema::builder(self.name);
        for field in self.fields {
            builder = builder.field(field.name, field.kind, field.required);
        }
        for computed in self.computed {
            builder = builder.computed(computed.name, computed.derivation);
        }
        builder.allow_extra(self.allow_extra).build()
    }
}

/// Executable definition of a declaratively specified model.
#[derive(Debug)]
pub struct ModelSchema {
    name: ModelName,
    fields: Vec<FieldSpec>,
    allow_extra: bool,
    computed: ComputedFields,
}

impl ModelSchema {
    pub fn builder(name: ModelName) -> ModelSchemaBuilder {
        ModelSchemaBuilder {
            name,
            fields: Vec::new(),
            computed: Vec::new(),
            allow_extra: false,
        }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn allows_extra(&self) -> bool {
        self.allow_extra
    }
}

impl ModelDefinition for ModelSchema {
    fn name(&self) -> &ModelName {
        &self.name
    }

    fn validate(&self, value: &Fields) -> Result<(), Vec<String>> {
        let mut violations = Vec::new();

        for field in &self.fields {
            match value.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    violations.push(format!("missing required field {}", field.name));
                }
                None | Some(Value::Null) => {}
                Some(v) if !field.kind.admits(v) => {
                    violations.push(format!("field {} must be {}", field.name, field.kind));
                }
                Some(_) => {}
            }
        }

        if !self.allow_extra {
            for name in value.keys() {
                if !self.fields.iter().any(|f| &f.name == name) {
                    violations.push(format!("unknown field {name}"));
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    fn computed_fields(&self) -> &ComputedFields {
        &self.computed
    }
}

/// Assembles a [`ModelSchema`], checking name collisions on [`build`].
///
/// [`build`]: ModelSchemaBuilder::build
pub struct ModelSchemaBuilder {
    name: ModelName,
    fields: Vec<FieldSpec>,
    computed: Vec<(String, Arc<dyn Derivation>)>,
    allow_extra: bool,
}

impl ModelSchemaBuilder {
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind, required: bool) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required,
        });
        self
    }

    pub fn required(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.field(name, kind, true)
    }

    pub fn optional(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.field(name, kind, false)
    }

    pub fn computed(mut self, name: impl Into<String>, derivation: impl Derivation + 'static) -> Self {
        self.computed.push((name.into(), Arc::new(derivation)));
        self
    }

    pub fn allow_extra(mut self, allow: bool) -> Self {
        self.allow_extra = allow;
        self
    }

    pub fn build(self) -> SchemaResult<ModelSchema> {
        let mut declared = HashSet::new();
        for field in &self.fields {
            if !declared.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    model: self.name,
                    field: field.name.clone(),
                });
            }
        }

        let mut computed = ComputedFields::new();
        for (name, derivation) in self.computed {
            if declared.contains(name.as_str()) {
                return Err(SchemaError::ComputedFieldCollision {
                    model: self.name,
                    field: name,
                });
            }
            if !computed.insert(name.clone(), derivation) {
                return Err(SchemaError::DuplicateField {
                    model: self.name,
                    field: name,
                });
            }
        }

        Ok(ModelSchema {
            name: self.name,
            fields: self.fields,
            allow_extra: self.allow_extra,
            computed,
        })
    }
}
