//! MCP client plumbing for external servers
//!
//! [`client`] speaks the Streamable HTTP transport (JSON-RPC 2.0 over
//! POST, with SSE responses accepted); [`pool`] keeps initialised sessions
//! warm, retries transient failures with backoff, and evicts broken
//! sessions so the next attempt starts clean.

pub mod client;
pub mod pool;

pub use client::{McpClient, McpClientError, MCP_FALLBACK_VERSIONS, MCP_PROTOCOL_VERSION};
pub use pool::{McpSessionPool, PoolStats};
