//! The appdb document store.
//!
//! [`DocumentStore`] is the single entry point for reading and writing app
//! data. Writes are validated against the app's model before anything is
//! persisted, committed with one atomic backend upsert, and then announced
//! on the change bus. Reads return persisted fields overlaid with the
//! model's computed fields.

pub mod error;
pub mod store;

pub use error::{DocError, DocResult};
pub use store::DocumentStore;

pub use appdb_bus::{BusConfig, ChangeBus, DocumentEvent, EventKind, OverflowPolicy, Scope, Subscription};
pub use appdb_schema::{ComputeFailure, Decorated};
pub use appdb_types::{Document, DocumentKey, Fields, ItemKey, KeyRange, Partition};
