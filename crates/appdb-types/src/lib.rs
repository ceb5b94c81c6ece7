//! Foundation types for appdb.
//!
//! Every other appdb crate depends on `appdb-types`. The types here describe
//! *where* a document lives and *what* it holds; they carry no storage or
//! schema behaviour of their own.
//!
//! # Key Types
//!
//! - [`WalletId`], [`AppId`], [`ModelName`], [`ItemKey`] -- opaque identifiers
//! - [`Partition`] -- (wallet, app, model); the unit of listing
//! - [`DocumentKey`] -- (wallet, app, model, key); globally unique identity
//! - [`KeyRange`] -- exclusive key bounds for range listing
//! - [`Document`] -- a persisted record with its [`Fields`] and timestamps

pub mod document;
pub mod error;
pub mod id;
pub mod key;

pub use document::{fields_from_value, merge_fields, Document, Fields};
pub use error::TypeError;
pub use id::{AppId, ItemKey, ModelName, WalletId};
pub use key::{DocumentKey, KeyRange, Partition};

/// Re-exported so downstream crates name one JSON value type.
pub use serde_json::Value;
