//! SQLite persistence for MCPbox
//!
//! Repositories own their SQL; entities are the plain structs from
//! `mcpbox-core`, mapped by hand so the row layout stays explicit. The
//! schema (including the partial unique indexes that enforce
//! at-most-one-pending-request semantics) is applied idempotently at
//! startup.

pub mod db;
pub mod error;
pub mod repositories;

pub use db::{connect, Database};
pub use error::{StorageError, StorageResult};
pub use repositories::{
    approvals::ApprovalRepo, auth::AuthRepo, credentials::CredentialRepo, logs::LogRepo,
    servers::ServerRepo, settings::SettingRepo, tools::ToolRepo,
};
