//! Model definitions and the engines built on them.
//!
//! An app declares *models* in its manifest. Each model is a
//! [`ModelDefinition`]: a validation predicate over a candidate value plus a
//! set of named computed-field derivations. This crate provides:
//!
//! - [`SchemaRegistry`] -- resolves `(app, model)` to a definition;
//!   [`CachingRegistry`] caches whole manifests per app with explicit
//!   invalidation
//! - [`ModelSchema`] -- the declarative definition built from manifest JSON
//! - [`Validator`] -- the write-path gate; the only producer of
//!   [`ValidatedFields`]
//! - [`ComputeEngine`] -- the read-path decorator producing [`Decorated`]
//!   documents

pub mod compute;
pub mod error;
pub mod manifest;
pub mod model;
pub mod registry;
pub mod schema;
pub mod validate;

pub use compute::{ComputeEngine, ComputeFailure, Decorated};
pub use error::{SchemaError, SchemaResult};
pub use manifest::{AppManifest, DirManifests, ManifestSource, ManifestSpec, StaticManifests};
pub use model::{ComputedFields, Derivation, ModelDefinition, ValidatedFields};
pub use registry::{CachingRegistry, SchemaRegistry};
pub use schema::{ComputedSpec, DerivationSpec, FieldKind, FieldSpec, ModelSchema, ModelSpec};
pub use validate::Validator;
