//! Container runtime client.
//!
//! [`RuntimeClient`] is the orchestrator's only view of the container
//! runtime. [`ComposeRuntime`] implements it by shelling out to
//! `docker compose` through a [`CommandExecutor`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{LabError, Result};
use crate::exec::{CommandExecutor, CommandSpec};
use crate::result::LabResult;

/// One row of `compose ps --format json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Service", default)]
    pub service: String,
    #[serde(rename = "State", default)]
    pub state: String,
    #[serde(rename = "Health", default)]
    pub health: String,
    #[serde(rename = "Status", default)]
    pub status: String,
}

/// Snapshot of the running lab.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabStatus {
    pub running: bool,
    pub containers: Vec<ContainerSummary>,
    pub error: String,
}

/// Current state of a single unit as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDescriptor {
    pub name: String,
    /// Runtime state, e.g. `running` or `exited`.
    pub state: String,
    /// Health-check state when the unit defines a healthcheck.
    pub health: Option<String>,
}

impl UnitDescriptor {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Operations the orchestrator needs from the container runtime.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Build and start all units in `profiles`, detached.
    async fn start(&self, profiles: &[String]) -> LabResult;

    /// Stop units in `profiles`, optionally removing their volumes.
    async fn stop(&self, profiles: &[String], remove_volumes: bool) -> LabResult;

    /// List the lab's units.
    async fn status(&self) -> LabStatus;

    /// Describe one unit. Missing units yield [`LabError::NotFound`].
    async fn inspect_unit(&self, name: &str) -> Result<UnitDescriptor>;

    /// Fetch an image ahead of start.
    async fn pull_image(&self, image: &str) -> LabResult;
}

/// Build `<program> compose --profile p1 ... <action>`, adding `--build -d`
/// for `up`.
pub fn build_compose_command(program: &str, action: &str, profiles: &[String]) -> Vec<String> {
    let mut cmd = vec![program.to_string(), "compose".to_string()];
    for profile in profiles {
        cmd.push("--profile".to_string());
        cmd.push(profile.clone());
    }
    cmd.push(action.to_string());
    if action == "up" {
        cmd.push("--build".to_string());
        cmd.push("-d".to_string());
    }
    cmd
}

/// Parse `compose ps --format json` output, which is either a JSON array or
/// one JSON object per line depending on the compose version.
pub fn parse_ps_output(stdout: &str) -> Result<Vec<ContainerSummary>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(LabError::from))
        .collect()
}

#[derive(Debug, Deserialize)]
struct InspectState {
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "Health", default)]
    health: Option<InspectHealth>,
}

#[derive(Debug, Deserialize)]
struct InspectHealth {
    #[serde(rename = "Status", default)]
    status: String,
}

/// Parse the output of `docker inspect --format "{{json .State}}"`.
pub fn parse_inspect_state(name: &str, stdout: &str) -> Result<UnitDescriptor> {
    let state: InspectState = serde_json::from_str(stdout.trim())?;
    let health = state
        .health
        .map(|h| h.status)
        .filter(|status| !status.is_empty());
    Ok(UnitDescriptor {
        name: name.to_string(),
        state: state.status,
        health,
    })
}

/// `docker compose` backed runtime client.
pub struct ComposeRuntime {
    executor: Arc<dyn CommandExecutor>,
    project_dir: PathBuf,
    program: String,
}

impl ComposeRuntime {
    pub fn new(executor: Arc<dyn CommandExecutor>, project_dir: impl AsRef<Path>) -> Self {
        Self {
            executor,
            project_dir: project_dir.as_ref().to_path_buf(),
            program: "docker".to_string(),
        }
    }

    /// Use a different runtime binary (e.g. `podman`).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn spec(&self, argv: Vec<String>) -> CommandSpec {
        CommandSpec::from_argv(argv).current_dir(&self.project_dir)
    }

    async fn run_action(&self, argv: Vec<String>, what: &str, done: &str) -> LabResult {
        let spec = self.spec(argv);
        debug!(command = %spec, "Runtime action");

        match self.executor.run(&spec).await {
            Ok(out) if out.success() => {
                info!("{done}");
                LabResult::ok(done)
            }
            Ok(out) => {
                let err = out.error_message(&format!("{what} exited with code {}", out.exit_code));
                error!(error = %err, "{what} failed");
                LabResult::failed(err)
            }
            Err(e) => {
                error!(error = %e, "{what} failed");
                LabResult::failed(e.to_string())
            }
        }
    }
}

#[async_trait]
impl RuntimeClient for ComposeRuntime {
    async fn start(&self, profiles: &[String]) -> LabResult {
        info!(?profiles, "Starting lab");
        let argv = build_compose_command(&self.program, "up", profiles);
        self.run_action(argv, "Lab start", "Lab started").await
    }

    async fn stop(&self, profiles: &[String], remove_volumes: bool) -> LabResult {
        info!(?profiles, remove_volumes, "Stopping lab");
        let mut argv = build_compose_command(&self.program, "down", profiles);
        if remove_volumes {
            argv.push("-v".to_string());
        }
        self.run_action(argv, "Lab stop", "Lab stopped").await
    }

    async fn status(&self) -> LabStatus {
        let argv = vec![
            self.program.clone(),
            "compose".to_string(),
            "ps".to_string(),
            "--format".to_string(),
            "json".to_string(),
        ];

        let out = match self.executor.run(&self.spec(argv)).await {
            Ok(out) if out.success() => out,
            Ok(out) => {
                let err = out.error_message("compose ps failed");
                warn!(error = %err, "Could not get lab status");
                return LabStatus {
                    error: err,
                    ..LabStatus::default()
                };
            }
            Err(e) => {
                warn!(error = %e, "Could not get lab status");
                return LabStatus {
                    error: e.to_string(),
                    ..LabStatus::default()
                };
            }
        };

        match parse_ps_output(&out.stdout) {
            Ok(containers) => LabStatus {
                running: !containers.is_empty(),
                containers,
                error: String::new(),
            },
            Err(e) => {
                warn!(error = %e, "Could not parse compose ps output");
                LabStatus {
                    error: "Failed to parse container status".to_string(),
                    ..LabStatus::default()
                }
            }
        }
    }

    async fn inspect_unit(&self, name: &str) -> Result<UnitDescriptor> {
        let spec = CommandSpec::new(&self.program).args([
            "inspect",
            "--format",
            "{{json .State}}",
            name,
        ]);
        let out = self.executor.run(&spec).await?;

        if !out.success() {
            let err = out.error_message("inspect failed");
            if err.contains("No such object") || err.contains("No such container") {
                return Err(LabError::NotFound(name.to_string()));
            }
            return Err(LabError::tool(&self.program, err));
        }

        parse_inspect_state(name, &out.stdout)
    }

    async fn pull_image(&self, image: &str) -> LabResult {
        let argv = vec![self.program.clone(), "pull".to_string(), image.to_string()];
        self.run_action(argv, "Image pull", &format!("Pulled {image}"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use crate::fakes::ScriptedExecutor;

    fn profiles(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_build_up_command() {
        let cmd = build_compose_command("docker", "up", &profiles(&["wazuh", "kali"]));
        assert_eq!(
            cmd,
            vec![
                "docker", "compose", "--profile", "wazuh", "--profile", "kali", "up", "--build",
                "-d"
            ]
        );
    }

    #[test]
    fn test_build_down_command_has_no_build_flags() {
        let cmd = build_compose_command("docker", "down", &[]);
        assert_eq!(cmd, vec!["docker", "compose", "down"]);
    }

    #[test]
    fn test_parse_ps_array_and_ndjson() {
        let array = r#"[{"Name":"aptl-kali-1","Service":"kali","State":"running","Health":""}]"#;
        let parsed = parse_ps_output(array).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "aptl-kali-1");

        let ndjson = "{\"Name\":\"a\",\"State\":\"running\"}\n\n{\"Name\":\"b\",\"State\":\"exited\",\"Health\":\"unhealthy\"}\n";
        let parsed = parse_ps_output(ndjson).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].health, "unhealthy");

        assert!(parse_ps_output("  \n").unwrap().is_empty());
        assert!(parse_ps_output("not json").is_err());
    }

    #[test]
    fn test_parse_inspect_state() {
        let unit = parse_inspect_state(
            "aptl-wazuh.indexer-1",
            r#"{"Status":"running","Health":{"Status":"starting","FailingStreak":0}}"#,
        )
        .unwrap();
        assert!(unit.is_running());
        assert_eq!(unit.health.as_deref(), Some("starting"));

        let unit = parse_inspect_state("kali", r#"{"Status":"exited"}"#).unwrap();
        assert!(!unit.is_running());
        assert!(unit.health.is_none());
    }

    #[tokio::test]
    async fn test_start_reports_stderr_on_failure() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond(
            &["docker", "compose"],
            CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "port is already allocated".to_string(),
            },
        );
        let runtime = ComposeRuntime::new(exec.clone(), "/tmp/aptl");

        let result = runtime.start(&profiles(&["wazuh"])).await;
        assert!(!result.success);
        assert_eq!(result.error, "port is already allocated");

        let calls = exec.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].cwd.as_deref(), Some(Path::new("/tmp/aptl")));
    }

    #[tokio::test]
    async fn test_stop_appends_volume_flag() {
        let exec = Arc::new(ScriptedExecutor::new());
        let runtime = ComposeRuntime::new(exec.clone(), ".");

        let result = runtime.stop(&profiles(&["victim"]), true).await;
        assert!(result.success);
        let argv = exec.calls()[0].argv().join(" ");
        assert_eq!(argv, "docker compose --profile victim down -v");
    }

    #[tokio::test]
    async fn test_status_parses_containers() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond_ok(
            &["docker", "compose", "ps"],
            "{\"Name\":\"aptl-victim-1\",\"State\":\"running\"}\n",
        );
        let runtime = ComposeRuntime::new(exec, ".");

        let status = runtime.status().await;
        assert!(status.running);
        assert_eq!(status.containers[0].name, "aptl-victim-1");
    }

    #[tokio::test]
    async fn test_status_unparseable_output() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond_ok(&["docker", "compose", "ps"], "garbage");
        let runtime = ComposeRuntime::new(exec, ".");

        let status = runtime.status().await;
        assert!(!status.running);
        assert_eq!(status.error, "Failed to parse container status");
    }

    #[tokio::test]
    async fn test_inspect_missing_unit_is_not_found() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond(
            &["docker", "inspect"],
            CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "Error: No such object: ghost".to_string(),
            },
        );
        let runtime = ComposeRuntime::new(exec, ".");

        let err = runtime.inspect_unit("ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
