//! Process resource limits
//!
//! Applied once at boot. RLIMIT_CPU is cumulative across the process
//! lifetime, so the value here is a last-resort safety net; per-call CPU
//! is bounded by the interpreter's step budget and deadline. Inside a
//! container, stricter cgroup limits already in place are accepted as
//! satisfying ours.

use mcpbox_config::SandboxConfig;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::SandboxError;

/// Which limits were successfully applied at boot.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ResourceLimitStatus {
    pub memory_limit_set: bool,
    pub cpu_limit_set: bool,
    pub fd_limit_set: bool,
    pub memory_limit_bytes: Option<u64>,
    pub cpu_limit_seconds: Option<u64>,
    pub fd_limit: Option<u64>,
}

impl ResourceLimitStatus {
    pub fn all_set(&self) -> bool {
        self.memory_limit_set && self.cpu_limit_set && self.fd_limit_set
    }

    pub fn any_set(&self) -> bool {
        self.memory_limit_set || self.cpu_limit_set || self.fd_limit_set
    }

    fn missing(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if !self.memory_limit_set {
            out.push("memory");
        }
        if !self.cpu_limit_set {
            out.push("CPU");
        }
        if !self.fd_limit_set {
            out.push("file descriptors");
        }
        out
    }
}

fn in_container() -> bool {
    std::path::Path::new("/.dockerenv").exists()
        || std::env::var("CONTAINER").as_deref() == Ok("true")
}

/// Apply the configured rlimits to the current process.
#[cfg(unix)]
pub fn set_resource_limits(config: &SandboxConfig) -> ResourceLimitStatus {
    use nix::sys::resource::{getrlimit, setrlimit, Resource};

    let mut status = ResourceLimitStatus::default();
    let containerised = in_container();

    // Address space: catches allocation bombs before the OOM killer does.
    match getrlimit(Resource::RLIMIT_AS) {
        Ok((_, hard)) => {
            if hard == nix::sys::resource::RLIM_INFINITY || hard > config.max_memory_bytes {
                match setrlimit(Resource::RLIMIT_AS, config.max_memory_bytes, hard) {
                    Ok(()) => {
                        status.memory_limit_set = true;
                        status.memory_limit_bytes = Some(config.max_memory_bytes);
                        info!(
                            limit_mb = config.max_memory_bytes / (1024 * 1024),
                            "set memory limit"
                        );
                    }
                    Err(e) if containerised => {
                        info!("memory limit delegated to container cgroup: {e}");
                        status.memory_limit_set = true;
                    }
                    Err(e) => warn!("could not set memory limit: {e}"),
                }
            } else {
                // Container already enforces something stricter
                status.memory_limit_set = true;
                status.memory_limit_bytes = Some(hard);
                info!(limit_mb = hard / (1024 * 1024), "container memory limit already set");
            }
        }
        Err(e) => warn!("could not read memory limit: {e}"),
    }

    // Cumulative CPU seconds, the backstop for runaway native work.
    match getrlimit(Resource::RLIMIT_CPU) {
        Ok((_, hard)) => match setrlimit(Resource::RLIMIT_CPU, config.cpu_limit_seconds, hard) {
            Ok(()) => {
                status.cpu_limit_set = true;
                status.cpu_limit_seconds = Some(config.cpu_limit_seconds);
                info!(limit_s = config.cpu_limit_seconds, "set CPU time limit (process-level safety net)");
            }
            Err(e) if containerised => {
                info!("CPU limit delegated to container cgroup: {e}");
                status.cpu_limit_set = true;
            }
            Err(e) => warn!("could not set CPU limit: {e}"),
        },
        Err(e) => warn!("could not read CPU limit: {e}"),
    }

    // File descriptors: defeats FD-exhaustion loops.
    match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok((_, hard)) => {
            let target = config.max_file_descriptors.min(hard);
            match setrlimit(Resource::RLIMIT_NOFILE, target, hard) {
                Ok(()) => {
                    status.fd_limit_set = true;
                    status.fd_limit = Some(target);
                    info!(limit = target, "set file descriptor limit");
                }
                Err(e) if containerised => {
                    info!("FD limit delegated to container: {e}");
                    status.fd_limit_set = true;
                }
                Err(e) => warn!("could not set file descriptor limit: {e}"),
            }
        }
        Err(e) => warn!("could not read file descriptor limit: {e}"),
    }

    status
}

#[cfg(not(unix))]
pub fn set_resource_limits(_config: &SandboxConfig) -> ResourceLimitStatus {
    warn!("resource limits are not supported on this platform");
    ResourceLimitStatus::default()
}

/// Check whether the applied limits satisfy the configured policy.
///
/// With `require_resource_limits` set, any missing critical limit makes the
/// service refuse non-health requests.
pub fn validate_resource_limits(
    config: &SandboxConfig,
    status: &ResourceLimitStatus,
) -> Result<(), SandboxError> {
    if !status.any_set() {
        return Err(SandboxError::LimitsNotSatisfied(
            "no resource limits could be set".to_string(),
        ));
    }

    if config.require_resource_limits && !status.all_set() {
        return Err(SandboxError::LimitsNotSatisfied(format!(
            "missing required resource limits: {}. Set REQUIRE_RESOURCE_LIMITS=false to disable this check",
            status.missing().join(", ")
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(require: bool) -> SandboxConfig {
        SandboxConfig {
            require_resource_limits: require,
            ..SandboxConfig::default()
        }
    }

    #[test]
    fn all_limits_satisfy_strict_policy() {
        let status = ResourceLimitStatus {
            memory_limit_set: true,
            cpu_limit_set: true,
            fd_limit_set: true,
            ..Default::default()
        };
        assert!(validate_resource_limits(&config(true), &status).is_ok());
    }

    #[test]
    fn missing_limit_fails_strict_policy() {
        let status = ResourceLimitStatus {
            memory_limit_set: true,
            cpu_limit_set: true,
            fd_limit_set: false,
            ..Default::default()
        };
        let err = validate_resource_limits(&config(true), &status).unwrap_err();
        assert!(err.to_string().contains("file descriptors"));
    }

    #[test]
    fn missing_limit_allowed_when_not_required() {
        let status = ResourceLimitStatus {
            memory_limit_set: true,
            ..Default::default()
        };
        assert!(validate_resource_limits(&config(false), &status).is_ok());
    }

    #[test]
    fn no_limits_at_all_always_fails() {
        let status = ResourceLimitStatus::default();
        assert!(validate_resource_limits(&config(false), &status).is_err());
    }
}
