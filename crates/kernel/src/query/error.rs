//! Query and mutation errors.

use thiserror::Error;

use crate::hook::HookError;
use crate::input::ValidationError;
use crate::store::StoreError;

/// A read or a mutation could not be executed.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("collection '{0}' is not registered")]
    UnknownCollection(String),

    /// A filter, order, group or projection names a column the collection
    /// does not have.
    #[error("collection '{collection}' has no field '{field}'")]
    UnknownField { collection: String, field: String },

    #[error("invalid query argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to populate field '{field}': {source}")]
    Populate {
        field: String,
        #[source]
        source: anyhow::Error,
    },
}

/// A create, update or delete failed.
#[derive(Debug, Error)]
pub enum MutationError {
    /// Field errors for a single input.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Per-input field errors of a batch create, by input position.
    /// Nothing was inserted.
    #[error("{} of {} inputs failed validation", .0.iter().flatten().count(), .0.len())]
    Batch(Vec<Option<ValidationError>>),

    /// The operation is not allowed in the current state.
    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Query(#[from] QueryError),
}

impl MutationError {
    /// Field errors of a single-input failure.
    pub fn field_errors(&self) -> Option<&ValidationError> {
        match self {
            MutationError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

impl From<HookError> for MutationError {
    fn from(err: HookError) -> Self {
        MutationError::Query(QueryError::Hook(err))
    }
}

impl From<StoreError> for MutationError {
    fn from(err: StoreError) -> Self {
        MutationError::Query(QueryError::Store(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_message_counts_failures() {
        let err = MutationError::Batch(vec![
            None,
            Some(ValidationError::single("slug", "taken")),
            None,
        ]);
        assert_eq!(err.to_string(), "1 of 3 inputs failed validation");
    }

    #[test]
    fn field_errors_only_for_single_validation() {
        let err = MutationError::from(ValidationError::single("title", "required"));
        assert_eq!(err.field_errors().and_then(|e| e.get("title")), Some("required"));
        assert!(MutationError::Rejected("no".into()).field_errors().is_none());
    }
}
