//! Registration error types.
//!
//! Registration problems never abort boot. They are collected as
//! diagnostics so the kernel can start with whatever compiled cleanly.

use thiserror::Error;

/// Errors raised while registering fields, collections, hooks and jobs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// Field type names must be lowercase URL-safe slugs.
    #[error("field type '{0}' is not a valid slug (lowercase letters, digits and dashes)")]
    InvalidFieldName(String),

    /// Two plugins registered the same field type without an override.
    #[error("field type '{0}' is already registered; register it as an override to replace it")]
    DuplicateField(String),

    /// Collection names become table names.
    #[error("collection name '{0}' must start with a letter and contain only a-z, 0-9 and _")]
    InvalidCollectionName(String),

    #[error("collection '{0}' is already registered")]
    DuplicateCollection(String),

    #[error("collection '{collection}': field '{field}' is declared more than once")]
    DuplicateCollectionField { collection: String, field: String },

    #[error("collection '{collection}': field name '{field}' must start with a letter and contain only a-z, 0-9 and _")]
    InvalidFieldIdentifier { collection: String, field: String },

    #[error("collection '{collection}': field '{field}' uses reserved name")]
    ReservedFieldName { collection: String, field: String },

    /// A collection field references a field type nobody registered.
    #[error("collection '{collection}': field '{field}' references unknown field type '{field_type}'")]
    UnknownFieldType {
        collection: String,
        field: String,
        field_type: String,
    },

    #[error("collection '{collection}': field '{field}' has invalid options: {details}")]
    InvalidFieldOptions {
        collection: String,
        field: String,
        details: String,
    },

    #[error("collection '{collection}': search field '{field}' is not a field of the collection")]
    UnknownSearchField { collection: String, field: String },

    /// Hooks may only target registered collections.
    #[error("hook registered for unknown collection '{collection}' ({action})")]
    UnknownHookCollection { collection: String, action: String },

    #[error("job '{0}' is already registered")]
    DuplicateJob(String),
}
