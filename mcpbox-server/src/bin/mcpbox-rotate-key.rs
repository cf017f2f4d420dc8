//! Offline encryption-key rotation
//!
//! Walks every encrypted column, decrypts under the old key and
//! re-encrypts under the new key preserving each column's AAD. The walk
//! refuses to write anything while any row fails to decrypt under the old
//! key, so a half-rotated database cannot be produced by a wrong key.
//! Dry-run mode reports counts only.

use anyhow::{bail, Context};
use clap::Parser;
use sqlx::Row;
use tracing_subscriber::EnvFilter;

use mcpbox_config::DatabaseConfig;
use mcpbox_crypto::{decrypt, decrypt_b64, encrypt_b64, reencrypt, EncryptionKey};

#[derive(Parser)]
#[command(name = "mcpbox-rotate-key", about = "Re-encrypt all stored secrets under a new key")]
struct Args {
    /// Current key, 64 hex chars
    #[arg(long, env = "MCPBOX_ENCRYPTION_KEY")]
    old_key: String,

    /// Replacement key, 64 hex chars
    #[arg(long, env = "MCPBOX_NEW_ENCRYPTION_KEY")]
    new_key: String,

    /// Database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://mcpbox.db?mode=rwc")]
    database_url: String,

    /// Verify and count without writing anything
    #[arg(long)]
    dry_run: bool,
}

/// Binary-blob columns rotated with a fixed AAD per column.
const CREDENTIAL_COLUMNS: &[(&str, &str)] = &[
    ("encrypted_value", "value"),
    ("encrypted_username", "username"),
    ("encrypted_password", "password"),
    ("encrypted_access_token", "access_token"),
    ("encrypted_refresh_token", "refresh_token"),
    ("oauth_client_secret", "oauth_client_secret"),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let old_key = EncryptionKey::from_hex(&args.old_key, false).context("parsing old key")?;
    let new_key = EncryptionKey::from_hex(&args.new_key, false).context("parsing new key")?;

    let config = DatabaseConfig {
        url: args.database_url.clone(),
        max_connections: 1,
    };
    let db = mcpbox_storage::connect(&config).await.context("opening database")?;
    let pool = db.pool();

    // Phase one: verify every value decrypts under the old key. Any
    // failure aborts before a single write.
    let mut planned: Vec<Rotation> = Vec::new();
    let mut failures = 0usize;

    // credentials: raw blobs, fixed per-column AAD
    for (column, aad) in CREDENTIAL_COLUMNS {
        let rows = sqlx::query(&format!(
            "SELECT id, {column} AS blob FROM credentials WHERE {column} IS NOT NULL"
        ))
        .fetch_all(pool)
        .await?;
        for row in rows {
            let id: String = row.try_get("id")?;
            let blob: Vec<u8> = row.try_get("blob")?;
            match reencrypt(&old_key, &new_key, &blob, aad) {
                Ok(rotated) => planned.push(Rotation::Blob {
                    table: "credentials",
                    column,
                    id,
                    value: rotated,
                }),
                Err(_) => {
                    eprintln!("credentials.{column} row {id}: does not decrypt under the old key");
                    failures += 1;
                }
            }
        }
    }

    // server_secrets: raw blobs, key name as AAD
    let rows = sqlx::query("SELECT id, key_name, encrypted_value FROM server_secrets")
        .fetch_all(pool)
        .await?;
    for row in rows {
        let id: String = row.try_get("id")?;
        let key_name: String = row.try_get("key_name")?;
        let blob: Vec<u8> = row.try_get("encrypted_value")?;
        match reencrypt(&old_key, &new_key, &blob, &key_name) {
            Ok(rotated) => planned.push(Rotation::Blob {
                table: "server_secrets",
                column: "encrypted_value",
                id,
                value: rotated,
            }),
            Err(_) => {
                eprintln!("server_secrets row {id} ({key_name}): does not decrypt under the old key");
                failures += 1;
            }
        }
    }

    // external sources: raw token blobs
    let rows = sqlx::query(
        "SELECT id, oauth_tokens_encrypted FROM external_mcp_sources WHERE oauth_tokens_encrypted IS NOT NULL",
    )
    .fetch_all(pool)
    .await?;
    for row in rows {
        let id: String = row.try_get("id")?;
        let blob: Vec<u8> = row.try_get("oauth_tokens_encrypted")?;
        match reencrypt(&old_key, &new_key, &blob, "oauth_tokens") {
            Ok(rotated) => planned.push(Rotation::Blob {
                table: "external_mcp_sources",
                column: "oauth_tokens_encrypted",
                id,
                value: rotated,
            }),
            Err(_) => {
                eprintln!("external_mcp_sources row {id}: does not decrypt under the old key");
                failures += 1;
            }
        }
    }

    // settings: base64-wrapped text, setting key as AAD
    let rows = sqlx::query("SELECT key, value FROM settings WHERE encrypted = 1 AND value IS NOT NULL")
        .fetch_all(pool)
        .await?;
    for row in rows {
        let key: String = row.try_get("key")?;
        let value: String = row.try_get("value")?;
        match decrypt_b64(&old_key, &value, &key)
            .and_then(|plaintext| encrypt_b64(&new_key, &plaintext, &key))
        {
            Ok(rotated) => planned.push(Rotation::Text { key, value: rotated }),
            Err(_) => {
                eprintln!("settings row {key}: does not decrypt under the old key");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!(
            "{failures} value(s) failed to decrypt under the old key; nothing was written. \
             Check that --old-key is the key currently in use."
        );
    }

    println!("{} value(s) verified against the old key", planned.len());
    if args.dry_run {
        println!("dry run: no changes written");
        return Ok(());
    }

    // Phase two: write back, one transaction per row.
    for rotation in &planned {
        let mut tx = pool.begin().await?;
        match rotation {
            Rotation::Blob {
                table,
                column,
                id,
                value,
            } => {
                sqlx::query(&format!("UPDATE {table} SET {column} = ? WHERE id = ?"))
                    .bind(value)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
            Rotation::Text { key, value } => {
                sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
                    .bind(value)
                    .bind(key)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
    }

    // Spot-check: the first rotated blob must decrypt under the new key
    if let Some(Rotation::Blob { table, column, id, .. }) = planned.first() {
        let row = sqlx::query(&format!("SELECT {column} AS blob FROM {table} WHERE id = ?"))
            .bind(id)
            .fetch_one(pool)
            .await?;
        let blob: Vec<u8> = row.try_get("blob")?;
        let aad = CREDENTIAL_COLUMNS
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, aad)| aad.to_string());
        if let Some(aad) = aad {
            decrypt(&new_key, &blob, &aad).context("post-rotation verification failed")?;
        }
    }

    println!("{} value(s) re-encrypted under the new key", planned.len());
    println!("Update MCPBOX_ENCRYPTION_KEY to the new key before restarting the services.");
    Ok(())
}

enum Rotation {
    Blob {
        table: &'static str,
        column: &'static str,
        id: String,
        value: Vec<u8>,
    },
    Text {
        key: String,
        value: String,
    },
}
