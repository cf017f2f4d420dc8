//! Storage error types

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A unique constraint rejected the write, e.g. a second pending
    /// approval request for the same target, or a duplicate name.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A stored value failed to parse back into its domain type.
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

impl StorageError {
    /// Translate unique-constraint violations into [`StorageError::Conflict`].
    pub fn from_sqlx(err: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return StorageError::Conflict(format!("{what} already exists"));
            }
        }
        StorageError::Database(err)
    }
}
