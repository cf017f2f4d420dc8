//! Keyed configuration rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A keyed setting; when `encrypted` is set, `value` holds base64-wrapped
/// AES-GCM ciphertext, AAD-bound to the key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: Option<String>,
    pub encrypted: bool,
    pub updated_at: DateTime<Utc>,
}

/// Well-known setting keys.
pub mod keys {
    pub const TOOL_APPROVAL_MODE: &str = "tool_approval_mode";
    pub const MODULE_APPROVAL_MODE: &str = "module_approval_mode";
    pub const NETWORK_ACCESS_POLICY: &str = "network_access_policy";
    pub const REMOTE_TOOL_EDITING: &str = "remote_tool_editing";
    pub const REDACT_SECRETS_IN_OUTPUT: &str = "redact_secrets_in_output";
    pub const LOG_RETENTION_DAYS: &str = "log_retention_days";
    pub const SERVICE_TOKEN: &str = "service_token";
    pub const ACCESS_POLICY_TYPE: &str = "access_policy_type";
    pub const ACCESS_POLICY_EMAILS: &str = "access_policy_emails";
    pub const ACCESS_POLICY_EMAIL_DOMAIN: &str = "access_policy_email_domain";
    pub const ALLOWED_MODULES: &str = "allowed_modules";
}

/// Values accepted for `tool_approval_mode` / `module_approval_mode` /
/// `network_access_policy`.
pub const APPROVAL_MODE_REQUIRE: &str = "require_approval";
pub const APPROVAL_MODE_AUTO: &str = "auto_approve";
