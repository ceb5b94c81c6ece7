//! Storage backends for appdb documents.
//!
//! A backend persists [`Document`](appdb_types::Document)s under their
//! composite key (wallet, app, model, key). The document store above it owns
//! all semantics; a backend only has to get the primitive operations right.
//!
//! # Backends
//!
//! All backends implement the [`StorageBackend`] trait:
//!
//! - [`InMemoryBackend`] -- `BTreeMap`-based store for tests and embedding
//! - [`SqliteBackend`] -- durable store on a single SQLite database
//!
//! # Design Rules
//!
//! 1. Upsert is one atomic operation keyed on the full composite key; there
//!    is never a separate existence check.
//! 2. Upsert replaces the whole value and keeps the original `created_at`.
//! 3. Range listing is ascending by key with exclusive bounds, produced
//!    eagerly from one read.
//! 4. Only [`ValidatedFields`](appdb_schema::ValidatedFields) are written.
//! 5. All backend errors are propagated, never retried or swallowed.

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryBackend;
pub use sqlite::SqliteBackend;
pub use traits::StorageBackend;
