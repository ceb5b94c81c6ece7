use thiserror::Error;

/// Errors produced by type construction and conversion.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("{kind} must not be empty")]
    EmptyIdentifier { kind: &'static str },

    #[error("document value must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },
}
