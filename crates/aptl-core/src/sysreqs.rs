//! Host prerequisite checks.
//!
//! The indexer (OpenSearch) refuses to start unless `vm.max_map_count` is at
//! least 262144.

use tracing::{error, info, warn};

use crate::error::LabError;
use crate::exec::{CommandExecutor, CommandSpec};

pub const MAX_MAP_COUNT_SETTING: &str = "vm.max_map_count";
pub const DEFAULT_MIN_MAP_COUNT: u64 = 262_144;

/// Outcome of a host requirement check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysReqResult {
    pub passed: bool,
    pub current_value: u64,
    pub required_value: u64,
    /// Why the value could not be read (empty when it was read).
    pub error: String,
}

impl SysReqResult {
    fn unreadable(required_value: u64, error: impl Into<String>) -> Self {
        Self {
            passed: false,
            current_value: 0,
            required_value,
            error: error.into(),
        }
    }

    /// Convert a failed check into an error for the pipeline.
    pub fn into_result(self) -> crate::Result<Self> {
        if self.passed {
            Ok(self)
        } else if !self.error.is_empty() {
            Err(LabError::tool("sysctl", self.error))
        } else {
            Err(LabError::RequirementNotMet {
                setting: MAX_MAP_COUNT_SETTING.to_string(),
                current: self.current_value,
                required: self.required_value,
            })
        }
    }
}

/// Parse `sysctl` output of the form `vm.max_map_count = 262144`.
pub fn parse_sysctl_value(stdout: &str) -> Option<u64> {
    let (_, value) = stdout.trim().split_once('=')?;
    value.trim().parse().ok()
}

/// Check that `vm.max_map_count` is at least `minimum`.
pub async fn check_max_map_count(executor: &dyn CommandExecutor, minimum: u64) -> SysReqResult {
    let spec = CommandSpec::new("sysctl").arg(MAX_MAP_COUNT_SETTING);
    let out = match executor.run(&spec).await {
        Ok(out) => out,
        Err(e) => {
            error!(error = %e, "Failed to run sysctl");
            return SysReqResult::unreadable(minimum, e.to_string());
        }
    };

    if !out.success() {
        let err = out.error_message("sysctl command failed");
        error!(error = %err, "sysctl returned non-zero");
        return SysReqResult::unreadable(minimum, err);
    }

    let Some(current_value) = parse_sysctl_value(&out.stdout) else {
        let stdout = out.stdout.trim();
        error!(output = stdout, "Failed to parse sysctl output");
        return SysReqResult::unreadable(
            minimum,
            format!("Failed to parse sysctl output: {stdout}"),
        );
    };

    let passed = current_value >= minimum;
    if passed {
        info!(current_value, minimum, "vm.max_map_count is adequate");
    } else {
        warn!(current_value, minimum, "vm.max_map_count is too low");
    }

    SysReqResult {
        passed,
        current_value,
        required_value: minimum,
        error: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use crate::fakes::ScriptedExecutor;

    #[test]
    fn test_parse_sysctl_value() {
        assert_eq!(parse_sysctl_value("vm.max_map_count = 262144\n"), Some(262144));
        assert_eq!(parse_sysctl_value("vm.max_map_count=65530"), Some(65530));
        assert_eq!(parse_sysctl_value("262144"), None);
        assert_eq!(parse_sysctl_value("vm.max_map_count = lots"), None);
    }

    #[tokio::test]
    async fn test_adequate_value_passes() {
        let exec = ScriptedExecutor::new();
        exec.respond_ok(&["sysctl"], "vm.max_map_count = 262144\n");

        let result = check_max_map_count(&exec, DEFAULT_MIN_MAP_COUNT).await;
        assert!(result.passed);
        assert!(result.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_low_value_fails_with_requirement_error() {
        let exec = ScriptedExecutor::new();
        exec.respond_ok(&["sysctl"], "vm.max_map_count = 65530\n");

        let result = check_max_map_count(&exec, DEFAULT_MIN_MAP_COUNT).await;
        assert!(!result.passed);
        assert_eq!(result.current_value, 65530);
        assert_eq!(result.required_value, 262144);
        assert!(matches!(
            result.into_result(),
            Err(LabError::RequirementNotMet { current: 65530, .. })
        ));
    }

    #[tokio::test]
    async fn test_sysctl_failure_is_unreadable() {
        let exec = ScriptedExecutor::new();
        exec.respond(
            &["sysctl"],
            CommandOutput {
                exit_code: 255,
                stdout: String::new(),
                stderr: String::new(),
            },
        );

        let result = check_max_map_count(&exec, DEFAULT_MIN_MAP_COUNT).await;
        assert!(!result.passed);
        assert_eq!(result.error, "sysctl command failed");
    }

    #[tokio::test]
    async fn test_sysctl_missing_binary() {
        let exec = ScriptedExecutor::new();
        exec.respond_err(&["sysctl"], "not installed or not in PATH");

        let result = check_max_map_count(&exec, DEFAULT_MIN_MAP_COUNT).await;
        assert!(!result.passed);
        assert!(result.error.contains("not installed"));
    }
}
