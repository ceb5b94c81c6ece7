use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use appdb_docs::{ChangeBus, DocumentStore};
use appdb_schema::{CachingRegistry, DirManifests};
use appdb_store::{InMemoryBackend, SqliteBackend, StorageBackend};

use crate::auth::StaticKeys;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::router::{build_router, build_router_with_cors, AppState};

/// The appdb HTTP server.
pub struct AppdbServer {
    config: ServerConfig,
    state: AppState,
}

impl AppdbServer {
    /// Open the configured backend and wire the document store.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let backend: Arc<dyn StorageBackend> = match config.database.path {
            Some(ref path) => Arc::new(
                SqliteBackend::open(path).map_err(|e| ServerError::Storage(e.to_string()))?,
            ),
            None => Arc::new(InMemoryBackend::new()),
        };
        let registry = Arc::new(CachingRegistry::new(DirManifests::new(
            config.manifests_dir.clone(),
        )));
        let store = DocumentStore::new(backend, registry, ChangeBus::new(config.bus.clone()));
        let auth = Arc::new(StaticKeys::from_config(&config.api_keys));

        Ok(Self::with_state(config, AppState { store, auth }))
    }

    /// Use pre-built components instead of the configured ones.
    pub fn with_state(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        if self.config.allow_any_origin {
            build_router_with_cors(self.state.clone())
        } else {
            build_router(self.state.clone())
        }
    }

    /// Start serving requests.
    pub async fn serve(self) -> ServerResult<()> {
        let app = self.router();
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        let bus = self.state.store.bus().config();
        info!(
            addr = %self.config.bind_addr,
            keys = self.config.api_keys.len(),
            persistent = self.config.database.path.is_some(),
            bus_capacity = bus.capacity,
            bus_overflow = ?bus.overflow,
            "appdb server listening"
        );
        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}
