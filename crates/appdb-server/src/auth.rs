use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use tracing::debug;

use appdb_types::WalletId;

use crate::config::ApiKeyConfig;
use crate::error::{ServerError, ServerResult};
use crate::router::AppState;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Query parameter accepted when the header is absent.
pub const API_KEY_PARAM: &str = "api-key";

/// What a key may do with its wallet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Admin,
    Invoice,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admin => write!(f, "admin"),
            Self::Invoice => write!(f, "invoice"),
        }
    }
}

/// The authenticated caller of one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub wallet: WalletId,
    pub permission: Permission,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.permission == Permission::Admin
    }
}

/// Resolves an API key to its wallet and permission.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, api_key: &str) -> ServerResult<Caller>;
}

/// A fixed key table, usually built from the server config.
#[derive(Clone, Debug, Default)]
pub struct StaticKeys {
    keys: HashMap<String, Caller>,
}

impl StaticKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(entries: &[ApiKeyConfig]) -> Self {
        entries.iter().fold(Self::new(), |keys, entry| {
            keys.with_key(&entry.key, entry.wallet.clone(), entry.permission)
        })
    }

    pub fn with_key(mut self, key: &str, wallet: WalletId, permission: Permission) -> Self {
        self.keys.insert(key.to_owned(), Caller { wallet, permission });
        self
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl AuthProvider for StaticKeys {
    async fn authenticate(&self, api_key: &str) -> ServerResult<Caller> {
        self.keys
            .get(api_key)
            .cloned()
            .ok_or_else(|| ServerError::Unauthorized("unknown api key".into()))
    }
}

#[derive(Deserialize)]
struct ApiKeyQuery {
    #[serde(rename = "api-key")]
    api_key: Option<String>,
}

/// The request's API key: the header first, then the query string.
fn api_key(parts: &Parts) -> Option<String> {
    let header = parts
        .headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());
    if let Some(key) = header {
        return Some(key.to_owned());
    }
    Query::<ApiKeyQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.api_key)
        .filter(|k| !k.is_empty())
}

/// Extracting a `Caller` authenticates the request and requires an admin
/// key; every app-data route needs one.
#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> ServerResult<Self> {
        let key = api_key(parts).ok_or_else(|| {
            ServerError::Unauthorized(format!("{API_KEY_HEADER} header not provided"))
        })?;
        let caller = state.auth.authenticate(&key).await?;
        if !caller.is_admin() {
            debug!(wallet = %caller.wallet, permission = %caller.permission, "non-admin key rejected");
            return Err(ServerError::Unauthorized(
                "app data requires an admin key".into(),
            ));
        }
        Ok(caller)
    }
}

/// Shared handle used in [`AppState`].
pub type SharedAuth = Arc<dyn AuthProvider>;
