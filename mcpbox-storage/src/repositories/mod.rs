//! Repositories, one per aggregate

pub mod approvals;
pub mod auth;
pub mod credentials;
pub mod logs;
pub mod servers;
pub mod settings;
pub mod tools;

use std::str::FromStr;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

/// Read a UUID stored as TEXT.
pub(crate) fn get_uuid(row: &SqliteRow, column: &str) -> StorageResult<Uuid> {
    let text: String = row.try_get(column)?;
    Uuid::parse_str(&text)
        .map_err(|_| StorageError::CorruptRow(format!("{column}: invalid UUID '{text}'")))
}

/// Read an optional UUID stored as TEXT.
pub(crate) fn get_opt_uuid(row: &SqliteRow, column: &str) -> StorageResult<Option<Uuid>> {
    let text: Option<String> = row.try_get(column)?;
    match text {
        Some(text) => Uuid::parse_str(&text)
            .map(Some)
            .map_err(|_| StorageError::CorruptRow(format!("{column}: invalid UUID '{text}'"))),
        None => Ok(None),
    }
}

/// Read a domain enum stored as TEXT.
pub(crate) fn get_enum<T>(row: &SqliteRow, column: &str) -> StorageResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let text: String = row.try_get(column)?;
    text.parse()
        .map_err(|e| StorageError::CorruptRow(format!("{column}: {e}")))
}

/// Read an optional domain enum stored as TEXT.
pub(crate) fn get_opt_enum<T>(row: &SqliteRow, column: &str) -> StorageResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let text: Option<String> = row.try_get(column)?;
    match text {
        Some(text) => text
            .parse()
            .map(Some)
            .map_err(|e| StorageError::CorruptRow(format!("{column}: {e}"))),
        None => Ok(None),
    }
}

/// Read an optional JSON value stored as TEXT.
pub(crate) fn get_opt_json(
    row: &SqliteRow,
    column: &str,
) -> StorageResult<Option<serde_json::Value>> {
    let text: Option<String> = row.try_get(column)?;
    match text {
        Some(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| StorageError::CorruptRow(format!("{column}: {e}"))),
        None => Ok(None),
    }
}

/// Read a JSON string array stored as TEXT.
pub(crate) fn get_string_vec(row: &SqliteRow, column: &str) -> StorageResult<Vec<String>> {
    let text: String = row.try_get(column)?;
    serde_json::from_str(&text)
        .map_err(|e| StorageError::CorruptRow(format!("{column}: {e}")))
}
