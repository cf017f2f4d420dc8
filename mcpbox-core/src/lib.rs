//! Core domain models and types for MCPbox
//!
//! This crate contains the fundamental types used throughout the MCPbox
//! system: servers, tools, credentials, approval artefacts, audit rows and
//! the enums that describe their states. It has minimal dependencies and
//! defines the domain language of the application.

pub mod approval;
pub mod credential;
pub mod error;
pub mod logs;
pub mod redact;
pub mod server;
pub mod setting;
pub mod tool;
pub mod types;
pub mod user;

// Re-export commonly used types at the crate root
pub use approval::{ModuleRequest, NetworkAccessRequest, RequestOrigin};
pub use credential::{Credential, CredentialForInjection, CredentialView};
pub use error::{CoreError, Result};
pub use logs::{ActivityLog, ToolExecutionLog};
pub use server::{ExternalMcpSource, Server, ServerSecret};
pub use setting::Setting;
pub use tool::{validate_tool_name, Tool, ToolVersion, ToolVersionDiff};
pub use types::{
    ApprovalStatus, AuthType, ChangeSource, GrantType, NetworkMode, RequestStatus, ServerStatus,
    SourceStatus, ToolType, TransportType,
};
pub use user::{AdminUser, TokenBlacklistEntry};
