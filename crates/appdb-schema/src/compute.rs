use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use appdb_types::Document;

use crate::model::ModelDefinition;
use crate::registry::SchemaRegistry;

/// One derived value that could not be produced on read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeFailure {
    /// The computed field, or `None` when the model itself could not be
    /// resolved and no derivation ran.
    pub field: Option<String>,
    pub reason: String,
}

impl fmt::Display for ComputeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.field {
            Some(ref field) => write!(f, "computed field {field}: {}", self.reason),
            None => write!(f, "computed fields unavailable: {}", self.reason),
        }
    }
}

/// A document as returned to a reader: persisted fields plus every computed
/// field that could be derived, with failures attached.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decorated {
    pub document: Document,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ComputeFailure>,
}

impl Decorated {
    /// Returns `true` if every computed field was derived.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Treat derivation failures as fatal.
    pub fn into_complete(self) -> Result<Document, Vec<ComputeFailure>> {
        if self.failures.is_empty() {
            Ok(self.document)
        } else {
            Err(self.failures)
        }
    }
}

/// The read-path decorator.
///
/// Runs on copies handed to callers; it never writes to storage.
#[derive(Clone)]
pub struct ComputeEngine {
    registry: Arc<dyn SchemaRegistry>,
}

impl ComputeEngine {
    pub fn new(registry: Arc<dyn SchemaRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve the document's model and overlay its computed fields.
    pub async fn decorate(&self, document: Document) -> Decorated {
        let resolved = self
            .registry
            .resolve_model(&document.key.app, &document.key.model)
            .await;
        match resolved {
            Ok(definition) => apply(definition.as_ref(), document),
            Err(e) => unresolved(document, e.to_string()),
        }
    }

    /// Decorate documents of one partition, resolving the model once.
    pub async fn decorate_all(&self, documents: Vec<Document>) -> Vec<Decorated> {
        let Some(first) = documents.first() else {
            return Vec::new();
        };
        let resolved = self
            .registry
            .resolve_model(&first.key.app, &first.key.model)
            .await;

        match resolved {
            Ok(definition) => documents
                .into_iter()
                .map(|doc| apply(definition.as_ref(), doc))
                .collect(),
            Err(e) => {
                let reason = e.to_string();
                documents
                    .into_iter()
                    .map(|doc| unresolved(doc, reason.clone()))
                    .collect()
            }
        }
    }
}

/// Overlay `definition`'s computed fields onto `document`.
///
/// Every derivation sees the persisted value only, never another computed
/// field. A computed field whose name is already a persisted field is not
/// applied; the collision is reported as a failure.
pub fn apply(definition: &dyn ModelDefinition, mut document: Document) -> Decorated {
    let mut derived = Vec::new();
    let mut failures = Vec::new();

    for (name, derivation) in definition.computed_fields().iter() {
        if document.value.contains_key(name) {
            failures.push(ComputeFailure {
                field: Some(name.to_string()),
                reason: "collides with a persisted field".into(),
            });
            continue;
        }
        match derivation.derive(&document.value) {
            Ok(value) => derived.push((name.to_string(), value)),
            Err(reason) => failures.push(ComputeFailure {
                field: Some(name.to_string()),
                reason,
            }),
        }
    }

    for failure in &failures {
        warn!(key = %document.key, %failure, "computed field failed");
    }
    document.value.extend(derived);

    Decorated { document, failures }
}

fn unresolved(document: Document, reason: String) -> Decorated {
    warn!(key = %document.key, %reason, "model unavailable on read");
    Decorated {
        document,
        failures: vec![ComputeFailure {
            field: None,
            reason,
        }],
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use appdb_types::{DocumentKey, Fields, Value};

    use super::*;
    use crate::manifest::{AppManifest, StaticManifests};
    use crate::registry::CachingRegistry;
    use crate::schema::{DerivationSpec, FieldKind, ModelSchema};

    fn doc(key: &str, value: Value) -> Document {
        let mut d = Document::tombstone(
            DocumentKey::parse("w1", "https://apps.example/crm.json", "contact", key).unwrap(),
        );
        d.value = appdb_types::fields_from_value(value).unwrap();
        d
    }

    fn contact() -> ModelSchema {
        ModelSchema::builder("contact".parse().unwrap())
            .optional("first", FieldKind::String)
            .optional("last", FieldKind::String)
            .optional("visits", FieldKind::Array)
            .allow_extra(true)
            .computed(
                "full_name",
                DerivationSpec::Concat {
                    fields: vec!["first".into(), "last".into()],
                    separator: " ".into(),
                },
            )
            .computed(
                "visit_count",
                DerivationSpec::Length {
                    field: "visits".into(),
                },
            )
            .build()
            .unwrap()
    }

    fn engine() -> ComputeEngine {
        let app = "https://apps.example/crm.json".parse().unwrap();
        let source = StaticManifests::new().with(AppManifest::new(app).with_model(contact()));
        ComputeEngine::new(Arc::new(CachingRegistry::new(source)))
    }

    #[tokio::test]
    async fn overlays_computed_fields() {
        let decorated = engine()
            .decorate(doc("k", json!({"first": "Ada", "last": "L", "visits": [1, 2]})))
            .await;
        assert!(decorated.is_complete());
        assert_eq!(decorated.document.value["full_name"], json!("Ada L"));
        assert_eq!(decorated.document.value["visit_count"], json!(2));
        assert_eq!(decorated.document.value["first"], json!("Ada"));
    }

    #[tokio::test]
    async fn failure_keeps_persisted_fields() {
        let decorated = engine().decorate(doc("k", json!({"first": "Ada"}))).await;

        assert_eq!(decorated.failures.len(), 1);
        assert_eq!(decorated.failures[0].field.as_deref(), Some("visit_count"));
        assert_eq!(decorated.document.value["first"], json!("Ada"));
        assert_eq!(decorated.document.value["full_name"], json!("Ada "));
        assert!(!decorated.document.value.contains_key("visit_count"));
        assert!(decorated.clone().into_complete().is_err());
    }

    #[tokio::test]
    async fn persisted_field_wins_over_computed_name() {
        let decorated = engine()
            .decorate(doc("k", json!({"full_name": "stored", "visits": []})))
            .await;

        assert_eq!(decorated.document.value["full_name"], json!("stored"));
        assert_eq!(decorated.failures.len(), 1);
        assert_eq!(decorated.failures[0].field.as_deref(), Some("full_name"));
    }

    #[tokio::test]
    async fn unresolvable_model_returns_base_value() {
        let engine = ComputeEngine::new(Arc::new(CachingRegistry::new(StaticManifests::new())));
        let decorated = engine.decorate(doc("k", json!({"first": "Ada"}))).await;

        assert_eq!(decorated.document.value.len(), 1);
        assert_eq!(decorated.failures.len(), 1);
        assert!(decorated.failures[0].field.is_none());
    }

    #[tokio::test]
    async fn decorate_all_keeps_order() {
        let docs = vec![
            doc("a", json!({"visits": []})),
            doc("b", json!({"visits": [1]})),
        ];
        let decorated = engine().decorate_all(docs).await;
        let keys: Vec<&str> = decorated
            .iter()
            .map(|d| d.document.key.key.as_str())
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(decorated[1].document.value["visit_count"], json!(1));
        assert!(engine().decorate_all(Vec::new()).await.is_empty());
    }

    #[test]
    fn derivations_see_persisted_value_only() {
        let model = ModelSchema::builder("m".parse().unwrap())
            .allow_extra(true)
            .computed("a", |_: &Fields| -> Result<Value, String> { Ok(json!(1)) })
            .computed("b", |v: &Fields| -> Result<Value, String> {
                Ok(json!(v.contains_key("a")))
            })
            .build()
            .unwrap();
        let decorated = apply(&model, doc("k", json!({})));
        assert_eq!(decorated.document.value["b"], json!(false));
    }

    #[test]
    fn failure_display() {
        let f = ComputeFailure {
            field: Some("total".into()),
            reason: "field x is missing".into(),
        };
        assert_eq!(f.to_string(), "computed field total: field x is missing");
    }
}
