//! Validation errors for pipeline resources.

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("table {0:?} is listed more than once")]
    DuplicateTable(String),

    #[error("invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid resource key {0:?}, expected namespace/name")]
    InvalidKey(String),
}
