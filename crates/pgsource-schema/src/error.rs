//! Database error types.

use thiserror::Error;

pub type SchemaResult<T> = Result<T, SchemaError>;

/// SQLSTATE classes meaning "the object to drop is already gone".
const NOT_FOUND_CODES: [&str; 3] = [
    "42P01", // undefined_table
    "42883", // undefined_function
    "42704", // undefined_object
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Connection, pool, or timeout failure; worth retrying as-is.
    #[error("database unavailable: {0}")]
    Unavailable(String),

    /// The server rejected a statement.
    #[error("{message}")]
    Statement {
        code: Option<String>,
        message: String,
    },

    /// A catalog row did not have the expected shape.
    #[error("unexpected row: {0}")]
    Decode(String),

    #[error("invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),
}

impl SchemaError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SchemaError::Unavailable(_))
    }

    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            SchemaError::Statement { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// The statement failed only because its target does not exist.
    pub fn is_not_found(&self) -> bool {
        self.sqlstate()
            .is_some_and(|code| NOT_FOUND_CODES.contains(&code))
    }
}

impl From<sqlx::Error> for SchemaError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) => SchemaError::Statement {
                code: db.code().map(|c| c.into_owned()),
                message: db.message().to_string(),
            },
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnIndexOutOfBounds { .. }
            | sqlx::Error::TypeNotFound { .. } => SchemaError::Decode(e.to_string()),
            _ => SchemaError::Unavailable(e.to_string()),
        }
    }
}
