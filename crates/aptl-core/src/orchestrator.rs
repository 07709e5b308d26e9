//! Lab lifecycle orchestration.
//!
//! [`Orchestrator::run`] drives the fixed twelve-step start sequence through
//! [`Pipeline`]. Collaborators are injected as trait objects so the whole
//! sequence can run against the in-memory fakes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::certs::{CertProvisioner, ComposeCertProvisioner};
use crate::config::{find_config, load_config, LabConfig, FALLBACK_PROFILES};
use crate::connections::{generate_connection_info, write_connection_file, CONNECTION_FILE};
use crate::credentials::{sync_dashboard_config, sync_manager_config};
use crate::env::{load_lab_secrets, LabSecrets};
use crate::error::{LabError, Result};
use crate::exec::{CommandExecutor, CommandSpec, ProcessExecutor};
use crate::health::{aggregate, check_unit, HealthSummary};
use crate::pipeline::{Pipeline, PipelineOutcome, StepFuture, StepSpec};
use crate::readiness::{indexer_probe, manager_api_probe, ssh_probe, ReadinessPoller, SshTarget};
use crate::result::LabResult;
use crate::runtime::{ComposeRuntime, LabStatus, RuntimeClient};
use crate::ssh::{KeyProvisioner, SshKeygenProvisioner, KEY_NAME};
use crate::sysreqs::{check_max_map_count, DEFAULT_MIN_MAP_COUNT};

/// Tunables for a lab run. Defaults match the stock lab layout.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorOptions {
    /// Host directory holding the lab key pair.
    pub host_ssh_dir: PathBuf,
    pub min_map_count: u64,
    /// Images fetched ahead of start.
    pub images: Vec<String>,
    pub indexer_url: String,
    /// Container the manager API is probed from.
    pub manager_container: String,
    /// Runtime binary used for `exec` probes.
    pub runtime_program: String,
    pub indexer_wait: ReadinessPoller,
    pub manager_wait: ReadinessPoller,
    /// Summary file name, relative to the project directory.
    pub connection_file: String,
    /// Integration build script, relative to the project directory.
    pub integration_script: PathBuf,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            host_ssh_dir: home.join(".ssh"),
            min_map_count: DEFAULT_MIN_MAP_COUNT,
            images: [
                "wazuh/wazuh-manager:4.9.2",
                "wazuh/wazuh-indexer:4.9.2",
                "wazuh/wazuh-dashboard:4.9.2",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            indexer_url: "https://localhost:9200".to_string(),
            manager_container: "aptl-wazuh.manager-1".to_string(),
            runtime_program: "docker".to_string(),
            indexer_wait: ReadinessPoller::new(Duration::from_secs(300), Duration::from_secs(10)),
            manager_wait: ReadinessPoller::new(Duration::from_secs(120), Duration::from_secs(5)),
            connection_file: CONNECTION_FILE.to_string(),
            integration_script: PathBuf::from("mcp").join("build-all-mcps.sh"),
        }
    }
}

/// Sequences the lab lifecycle over injected collaborators.
pub struct Orchestrator {
    executor: Arc<dyn CommandExecutor>,
    runtime: Arc<dyn RuntimeClient>,
    keys: Arc<dyn KeyProvisioner>,
    certs: Arc<dyn CertProvisioner>,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        runtime: Arc<dyn RuntimeClient>,
        keys: Arc<dyn KeyProvisioner>,
        certs: Arc<dyn CertProvisioner>,
    ) -> Self {
        Self {
            executor,
            runtime,
            keys,
            certs,
            options: OrchestratorOptions::default(),
        }
    }

    /// Real process-backed collaborators for `project_dir`.
    pub fn for_project(project_dir: &Path) -> Self {
        let executor: Arc<dyn CommandExecutor> = Arc::new(ProcessExecutor::new());
        Self::new(
            executor.clone(),
            Arc::new(ComposeRuntime::new(executor.clone(), project_dir)),
            Arc::new(SshKeygenProvisioner::new(executor.clone())),
            Arc::new(ComposeCertProvisioner::new(executor)),
        )
    }

    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Bring the lab up. Never returns an error; failures land in the result.
    pub async fn run(&self, project_dir: &Path) -> LabResult {
        self.run_steps(project_dir)
            .await
            .into_lab_result("Lab started successfully")
    }

    /// Bring the lab up, returning the per-step record.
    pub async fn run_steps(&self, project_dir: &Path) -> PipelineOutcome {
        let run_id = Uuid::new_v4();
        let span = info_span!("aptl.lab_run", run_id = %run_id);

        async {
            info!(project = %project_dir.display(), "Starting APTL lab");

            let mut ctx = RunContext {
                project_dir: project_dir.to_path_buf(),
                executor: self.executor.clone(),
                runtime: self.runtime.clone(),
                keys: self.keys.clone(),
                certs: self.certs.clone(),
                options: self.options.clone(),
                secrets: None,
                config: None,
                key_path: None,
            };
            let outcome = Pipeline::run(&mut ctx, &start_steps()).await;

            if outcome.succeeded() {
                info!(warnings = outcome.warning_count(), "APTL lab started successfully");
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Stop the lab. Profiles come from the config when it loads and enables
    /// at least one container, otherwise every default profile is stopped.
    pub async fn stop(&self, project_dir: &Path, remove_volumes: bool) -> LabResult {
        let profiles = match find_config(project_dir).map(|path| load_config(&path)) {
            Some(Ok(config)) => config.containers.enabled_profiles(),
            Some(Err(e)) => {
                warn!(error = %e, "Could not load config for profiles");
                Vec::new()
            }
            None => Vec::new(),
        };
        let profiles = if profiles.is_empty() {
            fallback_profiles()
        } else {
            profiles
        };

        self.runtime.stop(&profiles, remove_volumes).await
    }

    pub async fn status(&self) -> LabStatus {
        self.runtime.status().await
    }

    /// Probe every container the runtime lists.
    pub async fn health(&self, retries: u32, retry_delay: Duration) -> HealthSummary {
        let status = self.runtime.status().await;
        if !status.error.is_empty() {
            warn!(error = %status.error, "Could not list containers for health check");
        }

        let mut results = Vec::with_capacity(status.containers.len());
        for container in &status.containers {
            let result =
                check_unit(&container.name, self.runtime.as_ref(), retries, retry_delay).await;
            results.push(result);
        }
        aggregate(results)
    }
}

fn fallback_profiles() -> Vec<String> {
    FALLBACK_PROFILES.iter().map(|p| p.to_string()).collect()
}

/// State threaded through the start steps.
struct RunContext {
    project_dir: PathBuf,
    executor: Arc<dyn CommandExecutor>,
    runtime: Arc<dyn RuntimeClient>,
    keys: Arc<dyn KeyProvisioner>,
    certs: Arc<dyn CertProvisioner>,
    options: OrchestratorOptions,
    secrets: Option<LabSecrets>,
    config: Option<LabConfig>,
    key_path: Option<PathBuf>,
}

impl RunContext {
    fn secrets(&self) -> Result<&LabSecrets> {
        self.secrets
            .as_ref()
            .ok_or_else(|| LabError::Validation("credentials not loaded".to_string()))
    }

    fn config(&self) -> Result<&LabConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| LabError::Validation("configuration not loaded".to_string()))
    }
}

fn start_steps() -> [StepSpec<RunContext>; 12] {
    [
        StepSpec::critical("Loading environment variables", load_credentials),
        StepSpec::critical("Loading configuration", load_configuration),
        StepSpec::critical("Generating SSH keys", provision_ssh_keys),
        StepSpec::critical("Checking system requirements", check_system_requirements),
        StepSpec::best_effort("Syncing configuration credentials", sync_credentials),
        StepSpec::critical("Generating SSL certificates", provision_certificates),
        StepSpec::best_effort("Pre-pulling container images", pull_images),
        StepSpec::critical("Starting containers", start_containers),
        StepSpec::best_effort("Waiting for services", wait_for_services),
        StepSpec::best_effort("Testing SSH connectivity", verify_ssh),
        StepSpec::critical("Generating connection info", emit_connection_info),
        StepSpec::best_effort("Building MCP servers", build_integrations),
    ]
}

fn load_credentials(ctx: &mut RunContext) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.secrets = Some(load_lab_secrets(&ctx.project_dir.join(".env"))?);
        Ok(())
    })
}

fn load_configuration(ctx: &mut RunContext) -> StepFuture<'_> {
    Box::pin(async move {
        let path = find_config(&ctx.project_dir).ok_or_else(|| {
            LabError::Validation(format!(
                "Config file aptl.json not found in {}",
                ctx.project_dir.display()
            ))
        })?;
        let config = load_config(&path)?;
        info!(profiles = ?config.containers.enabled_profiles(), "Configuration loaded");
        ctx.config = Some(config);
        Ok(())
    })
}

fn provision_ssh_keys(ctx: &mut RunContext) -> StepFuture<'_> {
    Box::pin(async move {
        let keys_dir = ctx.project_dir.join("containers").join("keys");
        let result = ctx.keys.ensure(&keys_dir, &ctx.options.host_ssh_dir).await?;
        ctx.key_path = Some(result.key_path);
        Ok(())
    })
}

fn check_system_requirements(ctx: &mut RunContext) -> StepFuture<'_> {
    Box::pin(async move {
        check_max_map_count(ctx.executor.as_ref(), ctx.options.min_map_count)
            .await
            .into_result()?;
        Ok(())
    })
}

fn sync_credentials(ctx: &mut RunContext) -> StepFuture<'_> {
    Box::pin(async move {
        let secrets = ctx.secrets()?;
        let config_dir = ctx.project_dir.join("config");

        let results = [
            sync_dashboard_config(
                &config_dir.join("wazuh_dashboard").join("wazuh.yml"),
                &secrets.api_password,
            ),
            sync_manager_config(
                &config_dir.join("wazuh_cluster").join("wazuh_manager.conf"),
                &secrets.wazuh_cluster_key,
            ),
        ];

        match join_errors(results.into_iter().filter_map(|r| r.err()).collect()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    })
}

/// Fold several errors into the first, keeping its variant. `Io` and
/// `Validation` carry every message; other variants log the rest.
fn join_errors(errors: Vec<LabError>) -> Option<LabError> {
    let mut iter = errors.into_iter();
    let first = iter.next()?;
    let rest: Vec<String> = iter.map(|e| error_detail(&e)).collect();
    if rest.is_empty() {
        return Some(first);
    }

    let joined = |head: String| format!("{head}; {}", rest.join("; "));
    Some(match first {
        LabError::Io(e) => LabError::Io(std::io::Error::new(e.kind(), joined(e.to_string()))),
        LabError::Validation(msg) => LabError::Validation(joined(msg)),
        other => {
            for detail in &rest {
                warn!(error = %detail, "Additional failure");
            }
            other
        }
    })
}

fn error_detail(err: &LabError) -> String {
    match err {
        LabError::Io(e) => e.to_string(),
        LabError::Validation(msg) => msg.clone(),
        other => other.to_string(),
    }
}

fn provision_certificates(ctx: &mut RunContext) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.certs.ensure(&ctx.project_dir).await?;
        Ok(())
    })
}

fn pull_images(ctx: &mut RunContext) -> StepFuture<'_> {
    Box::pin(async move {
        let mut failed = Vec::new();
        for image in &ctx.options.images {
            let result = ctx.runtime.pull_image(image).await;
            if !result.success {
                warn!(image = %image, error = %result.error, "Failed to pull image");
                failed.push(image.clone());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(LabError::tool("image pull", failed.join(", ")))
        }
    })
}

fn start_containers(ctx: &mut RunContext) -> StepFuture<'_> {
    Box::pin(async move {
        let profiles = ctx.config()?.containers.enabled_profiles();
        let result = ctx.runtime.start(&profiles).await;
        if result.success {
            Ok(())
        } else {
            Err(LabError::tool("container start", result.error))
        }
    })
}

fn wait_for_services(ctx: &mut RunContext) -> StepFuture<'_> {
    Box::pin(async move {
        if !ctx.config()?.containers.wazuh {
            info!("Wazuh profile disabled; no services to wait for");
            return Ok(());
        }

        let secrets = ctx.secrets()?;
        let executor = ctx.executor.as_ref();
        let options = &ctx.options;

        let url = options.indexer_url.as_str();
        let (user, password) = (secrets.indexer_username.as_str(), secrets.indexer_password.as_str());
        let indexer = options
            .indexer_wait
            .wait("Wazuh Indexer", || indexer_probe(executor, url, user, password))
            .await;
        if !indexer.ready {
            warn!("Indexer may still be initializing");
        }

        let program = options.runtime_program.as_str();
        let container = options.manager_container.as_str();
        let (user, password) = (secrets.api_username.as_str(), secrets.api_password.as_str());
        let manager = options
            .manager_wait
            .wait("Wazuh Manager API", || {
                manager_api_probe(executor, program, container, user, password)
            })
            .await;
        if !manager.ready {
            warn!("Manager API may still be initializing");
        }

        indexer.into_result("Wazuh Indexer")?;
        manager.into_result("Wazuh Manager API")?;
        Ok(())
    })
}

fn ssh_targets(config: &LabConfig) -> Vec<SshTarget> {
    let containers = &config.containers;
    [
        (containers.victim, "victim", 2022, "labadmin"),
        (containers.kali, "kali", 2023, "kali"),
        (containers.reverse, "reverse", 2027, "labadmin"),
    ]
    .into_iter()
    .filter(|(enabled, ..)| *enabled)
    .map(|(_, name, port, user)| SshTarget {
        name,
        host: "localhost".to_string(),
        port,
        user,
    })
    .collect()
}

fn verify_ssh(ctx: &mut RunContext) -> StepFuture<'_> {
    Box::pin(async move {
        let key_path = ctx
            .key_path
            .clone()
            .unwrap_or_else(|| ctx.options.host_ssh_dir.join(KEY_NAME));

        let mut unreachable = Vec::new();
        for target in ssh_targets(ctx.config()?) {
            match ssh_probe(ctx.executor.as_ref(), &target, &key_path).await {
                Ok(true) => info!(container = target.name, "SSH is ready"),
                Ok(false) => {
                    warn!(container = target.name, "SSH not ready yet (may need more time)");
                    unreachable.push(target.name);
                }
                Err(e) => {
                    warn!(container = target.name, error = %e, "SSH probe failed");
                    unreachable.push(target.name);
                }
            }
        }

        if unreachable.is_empty() {
            Ok(())
        } else {
            Err(LabError::tool(
                "ssh",
                format!("not reachable: {}", unreachable.join(", ")),
            ))
        }
    })
}

fn emit_connection_info(ctx: &mut RunContext) -> StepFuture<'_> {
    Box::pin(async move {
        let info = generate_connection_info(
            ctx.config()?,
            ctx.secrets()?,
            &ctx.options.connection_file,
        );
        write_connection_file(&info, &ctx.project_dir.join(&ctx.options.connection_file))?;
        info!("\n{info}");
        Ok(())
    })
}

fn build_integrations(ctx: &mut RunContext) -> StepFuture<'_> {
    Box::pin(async move {
        let script = ctx.project_dir.join(&ctx.options.integration_script);
        if !script.is_file() {
            return Err(LabError::Validation(format!(
                "MCP build script not found at {}",
                script.display()
            )));
        }

        let spec = CommandSpec::new(script.to_string_lossy()).current_dir(&ctx.project_dir);
        let out = ctx.executor.run(&spec).await?;
        if !out.success() {
            return Err(LabError::tool(
                "MCP build",
                out.error_message("build script exited non-zero"),
            ));
        }

        info!("MCP servers built successfully");
        Ok(())
    })
}
