use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use appdb_docs::BusConfig;
use appdb_types::WalletId;

use crate::auth::Permission;
use crate::error::{ServerError, ServerResult};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub database: DatabaseConfig,
    /// Directory of app manifests, one JSON file per app.
    pub manifests_dir: PathBuf,
    pub bus: BusConfig,
    /// Answer CORS preflights for any origin.
    pub allow_any_origin: bool,
    pub api_keys: Vec<ApiKeyConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            database: DatabaseConfig::default(),
            manifests_dir: PathBuf::from("manifests"),
            bus: BusConfig::default(),
            allow_any_origin: false,
            api_keys: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load a TOML config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> ServerResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> ServerResult<Self> {
        toml::from_str(raw).map_err(|e| ServerError::Config(e.to_string()))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file. `None` keeps all data in memory.
    pub path: Option<PathBuf>,
}

/// One API key and the wallet it unlocks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub key: String,
    pub wallet: WalletId,
    pub permission: Permission,
}

#[cfg(test)]
mod tests {
    use appdb_docs::OverflowPolicy;

    use super::*;

    #[test]
    fn default_config() {
        let c = ServerConfig::default();
        assert_eq!(c.bind_addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert!(c.database.path.is_none());
        assert_eq!(c.bus.capacity, 1024);
        assert!(c.api_keys.is_empty());
    }

    #[test]
    fn parses_toml() {
        let c = ServerConfig::from_toml(
            r#"
            bind_addr = "0.0.0.0:9000"
            manifests_dir = "/srv/manifests"

            [database]
            path = "/var/lib/appdb.sqlite"

            [bus]
            capacity = 64
            overflow = "drop_newest"

            [[api_keys]]
            key = "adm-1"
            wallet = "w1"
            permission = "admin"

            [[api_keys]]
            key = "inv-1"
            wallet = "w1"
            permission = "invoice"
            "#,
        )
        .unwrap();

        assert_eq!(c.bind_addr.port(), 9000);
        assert_eq!(c.database.path, Some(PathBuf::from("/var/lib/appdb.sqlite")));
        assert_eq!(c.bus.capacity, 64);
        assert_eq!(c.bus.overflow, OverflowPolicy::DropNewest);
        assert_eq!(c.api_keys.len(), 2);
        assert_eq!(c.api_keys[1].permission, Permission::Invoice);
    }

    #[test]
    fn rejects_bad_values() {
        let err = ServerConfig::from_toml("bind_addr = 5").unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appdb.toml");
        std::fs::write(&path, "allow_any_origin = true\n").unwrap();

        let c = ServerConfig::load(&path).unwrap();
        assert!(c.allow_any_origin);
        assert!(ServerConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
