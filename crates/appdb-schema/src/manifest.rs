use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use appdb_types::{AppId, ModelName};

use crate::error::{SchemaError, SchemaResult};
use crate::model::ModelDefinition;
use crate::schema::ModelSpec;

/// An app manifest as it appears on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub models: Vec<ModelSpec>,
}

/// The resolved models of one app.
#[derive(Clone)]
pub struct AppManifest {
    app: AppId,
    name: Option<String>,
    models: HashMap<ModelName, Arc<dyn ModelDefinition>>,
}

impl AppManifest {
    /// An empty manifest; add models with [`Self::with_model`].
    pub fn new(app: AppId) -> Self {
        Self {
            app,
            name: None,
            models: HashMap::new(),
        }
    }

    /// Register a model definition, replacing any model of the same name.
    pub fn with_model(mut self, model: impl ModelDefinition + 'static) -> Self {
        self.models.insert(model.name().clone(), Arc::new(model));
        self
    }

    /// Build every model of a wire manifest. Fails on the first model whose
    /// declaration is inconsistent, or on a model declared twice.
    pub fn from_spec(app: AppId, spec: ManifestSpec) -> SchemaResult<Self> {
        let mut models: HashMap<ModelName, Arc<dyn ModelDefinition>> = HashMap::new();
        for model_spec in spec.models {
            let name = model_spec.name.clone();
            let model = model_spec.build()?;
            if models.insert(name.clone(), Arc::new(model)).is_some() {
                return Err(SchemaError::Manifest {
                    app,
                    reason: format!("model {name} is declared more than once"),
                });
            }
        }
        Ok(Self {
            app,
            name: spec.name,
            models,
        })
    }

    /// Parse and build a JSON manifest.
    pub fn from_json(app: AppId, json: &str) -> SchemaResult<Self> {
        let spec: ManifestSpec =
            serde_json::from_str(json).map_err(|e| SchemaError::Manifest {
                app: app.clone(),
                reason: e.to_string(),
            })?;
        Self::from_spec(app, spec)
    }

    pub fn app(&self) -> &AppId {
        &self.app
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn model(&self, name: &ModelName) -> Option<Arc<dyn ModelDefinition>> {
        self.models.get(name).cloned()
    }

    /// Declared model names, sorted.
    pub fn model_names(&self) -> Vec<&ModelName> {
        let mut names: Vec<&ModelName> = self.models.keys().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for AppManifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppManifest")
            .field("app", &self.app)
            .field("name", &self.name)
            .field("models", &self.model_names())
            .finish()
    }
}

/// Where manifests come from.
///
/// Fetching (and, for executable manifests, running the app) is the
/// source's business; the registry only caches what it returns.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn fetch(&self, app: &AppId) -> SchemaResult<AppManifest>;
}

/// In-memory manifests, for tests and embedding.
#[derive(Default)]
pub struct StaticManifests {
    manifests: RwLock<HashMap<AppId, AppManifest>>,
}

impl StaticManifests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the manifest for its app.
    pub fn insert(&self, manifest: AppManifest) {
        self.manifests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(manifest.app().clone(), manifest);
    }

    pub fn with(self, manifest: AppManifest) -> Self {
        self.insert(manifest);
        self
    }
}

#[async_trait]
impl ManifestSource for StaticManifests {
    async fn fetch(&self, app: &AppId) -> SchemaResult<AppManifest> {
        self.manifests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(app)
            .cloned()
            .ok_or_else(|| SchemaError::resolution(app, "no manifest registered"))
    }
}

/// JSON manifests stored one per file under a directory.
///
/// The file for an app is its id plus `.json`, with every byte outside
/// `[A-Za-z0-9.-]` written as `_` and two lowercase hex digits. The
/// escape is reversible, so distinct ids never share a file.
#[derive(Clone, Debug)]
pub struct DirManifests {
    root: PathBuf,
}

impl DirManifests {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the manifest file for `app`.
    pub fn path_for(&self, app: &AppId) -> PathBuf {
        let mut file = String::with_capacity(app.as_str().len() + 5);
        for byte in app.as_str().bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'-') {
                file.push(char::from(byte));
            } else {
                file.push_str(&format!("_{byte:02x}"));
            }
        }
        file.push_str(".json");
        self.root.join(file)
    }
}

#[async_trait]
impl ManifestSource for DirManifests {
    async fn fetch(&self, app: &AppId) -> SchemaResult<AppManifest> {
        let path = self.path_for(app);
        debug!(app = %app, path = %path.display(), "reading manifest");
        let json = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| SchemaError::resolution(app, format!("{}: {e}", path.display())))?;
        AppManifest::from_json(app.clone(), &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TODO_MANIFEST: &str = r#"{
        "name": "Todo",
        "models": [
            {
                "name": "item",
                "fields": [
                    {"name": "title", "type": "string", "required": true},
                    {"name": "done", "type": "boolean"}
                ]
            }
        ]
    }"#;

    fn app() -> AppId {
        "https://apps.example/todo.json".parse().unwrap()
    }

    #[test]
    fn manifest_from_json() {
        let manifest = AppManifest::from_json(app(), TODO_MANIFEST).unwrap();
        assert_eq!(manifest.name(), Some("Todo"));
        let item: ModelName = "item".parse().unwrap();
        assert_eq!(manifest.model_names(), vec![&item]);
        assert!(manifest.model(&item).is_some());
        assert!(manifest.model(&"other".parse().unwrap()).is_none());
    }

    #[test]
    fn malformed_manifest_is_reported() {
        let err = AppManifest::from_json(app(), "{\"models\": 3}").unwrap_err();
        assert!(matches!(err, SchemaError::Manifest { .. }));
    }

    #[test]
    fn duplicate_model_is_reported() {
        let json = r#"{"models": [{"name": "a"}, {"name": "a"}]}"#;
        let err = AppManifest::from_json(app(), json).unwrap_err();
        assert!(matches!(err, SchemaError::Manifest { .. }));
    }

    #[tokio::test]
    async fn static_source_misses_are_resolution_errors() {
        let source = StaticManifests::new();
        let err = source.fetch(&app()).await.unwrap_err();
        assert!(err.is_resolution());

        source.insert(AppManifest::from_json(app(), TODO_MANIFEST).unwrap());
        assert!(source.fetch(&app()).await.is_ok());
    }

    #[test]
    fn dir_source_escapes_file_names() {
        let source = DirManifests::new("/manifests");
        assert_eq!(
            source.path_for(&app()),
            PathBuf::from("/manifests/https_3a_2f_2fapps.example_2ftodo.json.json")
        );
        assert_eq!(
            source.path_for(&"todo".parse().unwrap()),
            PathBuf::from("/manifests/todo.json")
        );
    }

    #[test]
    fn distinct_apps_never_share_a_file() {
        let source = DirManifests::new("/manifests");
        let ids = ["https://a/b", "https:__a_b", "https_3a_2f_2fa_2fb", "a b", "a_20b"];
        let paths: std::collections::HashSet<PathBuf> = ids
            .iter()
            .map(|id| source.path_for(&id.parse().unwrap()))
            .collect();
        assert_eq!(paths.len(), ids.len());
    }

    #[tokio::test]
    async fn dir_source_reads_manifest_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirManifests::new(dir.path());
        std::fs::write(source.path_for(&app()), TODO_MANIFEST).unwrap();

        let manifest = source.fetch(&app()).await.unwrap();
        assert_eq!(manifest.app(), &app());

        let missing: AppId = "https://apps.example/missing.json".parse().unwrap();
        let err = source.fetch(&missing).await.unwrap_err();
        assert!(matches!(err, SchemaError::Resolution { .. }));
    }
}
