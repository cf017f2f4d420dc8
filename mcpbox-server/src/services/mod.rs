//! Business services of the management plane

pub mod approval;
pub mod auth;
pub mod credentials;
pub mod email_policy;
pub mod execution_log;
pub mod export_import;
pub mod oauth;
pub mod secrets;
pub mod token_refresh;
