//! MCPbox management plane
//!
//! The process external LLM clients and the admin console talk to. It
//! owns the database, the credential store, the approval engine, the auth
//! plane and the MCP gateway; tool execution is delegated to the sandbox
//! process over a mutually authenticated loopback channel.

pub mod error;
pub mod gateway;
pub mod jobs;
pub mod middleware;
pub mod routes;
pub mod sandbox_client;
pub mod services;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::AppState;
