//! Error types.
//!
//! Compile-time errors are raised before anything reaches an executor and are
//! never retried. Registry errors surface while the process is starting up.

use thiserror::Error;

/// Errors raised while compiling a filter, sort, page or aggregate request.
#[derive(Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("unknown operator '{operator}' for field '{field}'")]
    UnknownOperator { field: String, operator: String },

    #[error("invalid value for '{operator}' on field '{field}': {reason}")]
    InvalidComparisonValue {
        field: String,
        operator: String,
        reason: String,
    },

    #[error("no aggregate fields specified")]
    NoAggregateFields,

    #[error("unknown aggregate column '{0}'")]
    UnknownAggregateColumn(String),

    #[error("invalid cursor: {0}")]
    CursorDecode(String),

    #[error("page size {requested} exceeds maximum of {max}")]
    PageSizeExceeded { requested: u64, max: u64 },

    #[error("invalid paging: {0}")]
    InvalidPaging(String),

    #[error("unknown entity '{0}'")]
    UnknownEntity(String),
}

impl QueryError {
    pub(crate) fn invalid_value(
        field: &str,
        operator: &str,
        reason: impl Into<String>,
    ) -> Self {
        QueryError::InvalidComparisonValue {
            field: field.to_string(),
            operator: operator.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unknown_operator(field: &str, operator: &str) -> Self {
        QueryError::UnknownOperator {
            field: field.to_string(),
            operator: operator.to_string(),
        }
    }
}

/// Errors raised while building the custom filter registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("custom filter for {target} has no operations")]
    EmptyOperations { target: String },

    #[error("custom filter with handler '{handler}' has no column types")]
    EmptyTypes { handler: String },

    #[error("unknown filter handler '{0}'")]
    UnknownHandler(String),

    #[error("invalid operation name '{0}'")]
    InvalidOperation(String),
}

/// Errors from service calls that reach the executor.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("query execution failed")]
    Execution(#[source] anyhow::Error),

    #[error("failed to decode result row")]
    Decode(#[from] serde_json::Error),
}

/// Result type alias for compilation.
pub type QueryResult<T> = Result<T, QueryError>;
