use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, info};

use appdb_types::{AppId, ModelName};

use crate::error::{SchemaError, SchemaResult};
use crate::manifest::{AppManifest, ManifestSource};
use crate::model::ModelDefinition;

/// Resolves `(app, model)` to the model's definition.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    async fn resolve_model(
        &self,
        app: &AppId,
        model: &ModelName,
    ) -> SchemaResult<Arc<dyn ModelDefinition>>;

    /// Forget anything cached for `app`. Registries without a cache ignore
    /// this.
    fn invalidate(&self, _app: &AppId) {}
}

/// A registry that fetches each app's manifest once and caches it.
///
/// Two concurrent misses for the same app may both fetch; the first
/// manifest inserted wins. Nothing expires on its own: call
/// [`invalidate`](SchemaRegistry::invalidate) or
/// [`invalidate_all`](Self::invalidate_all) when a manifest changes.
pub struct CachingRegistry<S> {
    source: S,
    cache: RwLock<HashMap<AppId, Arc<AppManifest>>>,
}

impl<S: ManifestSource> CachingRegistry<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// The manifest for `app`, fetching it on a cache miss.
    pub async fn manifest(&self, app: &AppId) -> SchemaResult<Arc<AppManifest>> {
        if let Some(hit) = self.cached(app) {
            return Ok(hit);
        }

        let fetched = Arc::new(self.source.fetch(app).await?);
        info!(app = %app, models = fetched.model_names().len(), "manifest loaded");

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(cache.entry(app.clone()).or_insert(fetched)))
    }

    /// Fetch and cache `app`'s manifest ahead of first use, surfacing any
    /// resolution failure now.
    pub async fn preload(&self, app: &AppId) -> SchemaResult<()> {
        self.manifest(app).await.map(|_| ())
    }

    /// Drop every cached manifest.
    pub fn invalidate_all(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of apps currently cached.
    pub fn cached_apps(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn cached(&self, app: &AppId) -> Option<Arc<AppManifest>> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(app)
            .cloned()
    }
}

#[async_trait]
impl<S: ManifestSource> SchemaRegistry for CachingRegistry<S> {
    async fn resolve_model(
        &self,
        app: &AppId,
        model: &ModelName,
    ) -> SchemaResult<Arc<dyn ModelDefinition>> {
        let manifest = self.manifest(app).await?;
        manifest.model(model).ok_or_else(|| SchemaError::UnknownModel {
            app: app.clone(),
            model: model.clone(),
        })
    }

    fn invalidate(&self, app: &AppId) {
        let removed = self
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(app)
            .is_some();
        debug!(app = %app, removed, "manifest invalidated");
    }
}
