//! Database connection and schema bootstrap

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use mcpbox_config::DatabaseConfig;

use crate::error::StorageResult;

/// Embedded DDL, applied idempotently at startup.
const SCHEMA: &str = include_str!("schema.sql");

/// Handle to the SQLite pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Open the database, enable foreign keys, and apply the schema.
pub async fn connect(config: &DatabaseConfig) -> StorageResult<Database> {
    let url = config
        .url
        .strip_prefix("sqlite://")
        .unwrap_or(&config.url);

    let options = if url == ":memory:" || config.url == "sqlite::memory:" {
        SqliteConnectOptions::new().in_memory(true)
    } else {
        SqliteConnectOptions::from_str(&config.url)
            .unwrap_or_else(|_| SqliteConnectOptions::new().filename(url))
            .create_if_missing(true)
    }
    .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    apply_schema(&pool).await?;
    info!(url = %config.url, "database ready");
    Ok(Database { pool })
}

async fn apply_schema(pool: &SqlitePool) -> StorageResult<()> {
    let without_comments: String = SCHEMA
        .lines()
        .map(|line| line.split("--").next().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n");
    for statement in without_comments.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// In-memory database for tests.
#[cfg(any(test, feature = "testing"))]
pub async fn connect_test() -> Database {
    let config = DatabaseConfig::in_memory();
    connect(&config).await.expect("test database opens")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_applies_cleanly() {
        let db = connect_test().await;
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert!(count.0 >= 12, "expected all tables, got {}", count.0);
    }

    #[tokio::test]
    async fn schema_is_idempotent() {
        let db = connect_test().await;
        apply_schema(db.pool()).await.unwrap();
    }
}
