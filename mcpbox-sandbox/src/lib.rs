//! Sandboxed tool runtime for MCPbox
//!
//! This crate is the separate process that executes untrusted tool code.
//! Defence-in-depth layers, outermost first:
//!
//! 1. Container isolation (assumed, not implemented here).
//! 2. Process resource limits ([`limits`]): address space, CPU, FDs.
//! 3. Static source validation ([`pytool::validate`]): forbidden patterns
//!    rejected before anything is parsed.
//! 4. A bespoke interpreter ([`pytool`]) with allowlisted builtins, an
//!    import shim over curated module proxies, and an isolated `os`.
//! 5. An SSRF-validated HTTP collaborator with pinned connections.
//!
//! Remote MCP servers are reached through a pooled session layer
//! ([`mcp`]) with retry and transparent session recreation. The whole
//! runtime is fronted by a loopback HTTP service ([`service`]) that the
//! management plane calls with a shared API key.

pub mod error;
pub mod executor;
pub mod limits;
pub mod mcp;
pub mod pytool;
pub mod registry;
pub mod service;

pub use error::{ErrorKind, SandboxError};
pub use executor::{ExecutionRequest, ExecutionResult, Executor};
pub use registry::{RegisteredServer, RegisteredTool, ToolRegistry};
