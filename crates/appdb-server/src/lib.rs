//! HTTP server for appdb.
//!
//! Exposes the document store over REST. Every app-data route authenticates
//! the caller by API key and scopes all access to the caller's wallet.

pub mod auth;
pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;

pub use auth::{AuthProvider, Caller, Permission, StaticKeys};
pub use config::{ApiKeyConfig, DatabaseConfig, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use router::{build_router, AppState};
pub use server::AppdbServer;
