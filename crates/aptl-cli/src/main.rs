//! APTL - Advanced Purple Team Lab CLI
//!
//! The `aptl` command manages the lifecycle of the local lab.
//!
//! ## Commands
//!
//! - `lab start|stop|status|health`: bring the lab up or down and inspect it
//! - `config show|validate`: inspect the `aptl.json` configuration
//! - `container list`: list lab containers and their state

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, Level};

use aptl_core::{find_config, load_config, LabConfig, Orchestrator};

#[derive(Parser)]
#[command(name = "aptl")]
#[command(author = "APTL Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Advanced Purple Team Lab (APTL)", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct ProjectArgs {
    /// Path to the APTL project directory
    #[arg(short = 'd', long, default_value = ".")]
    project_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Lab lifecycle management
    Lab {
        #[command(subcommand)]
        action: LabAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Container operations
    Container {
        #[command(subcommand)]
        action: ContainerAction,
    },
}

#[derive(Subcommand)]
enum LabAction {
    /// Start the lab environment
    Start {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Stop the lab environment
    Stop {
        /// Also remove volumes (full cleanup)
        #[arg(long)]
        volumes: bool,

        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Show the current lab status
    Status {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Check the health of every lab container
    Health {
        /// Lookup attempts per container
        #[arg(long, default_value_t = 3)]
        retries: u32,

        /// Seconds between lookup attempts
        #[arg(long, default_value_t = 2)]
        retry_delay: u64,

        #[command(flatten)]
        project: ProjectArgs,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Display the current configuration
    Show {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Validate the configuration file
    Validate {
        #[command(flatten)]
        project: ProjectArgs,
    },
}

#[derive(Subcommand)]
enum ContainerAction {
    /// List lab containers and their status
    List {
        #[command(flatten)]
        project: ProjectArgs,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    aptl_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Lab { action } => match action {
            LabAction::Start { project } => {
                let orchestrator = Orchestrator::for_project(&project.project_dir);
                cmd_lab_start(&orchestrator, &project.project_dir).await
            }
            LabAction::Stop { volumes, project } => {
                let orchestrator = Orchestrator::for_project(&project.project_dir);
                cmd_lab_stop(&orchestrator, &project.project_dir, volumes).await
            }
            LabAction::Status { project } => {
                cmd_lab_status(&Orchestrator::for_project(&project.project_dir)).await
            }
            LabAction::Health {
                retries,
                retry_delay,
                project,
            } => {
                let orchestrator = Orchestrator::for_project(&project.project_dir);
                cmd_lab_health(&orchestrator, retries, Duration::from_secs(retry_delay)).await
            }
        },
        Commands::Config { action } => match action {
            ConfigAction::Show { project } => cmd_config_show(&project.project_dir),
            ConfigAction::Validate { project } => cmd_config_validate(&project.project_dir),
        },
        Commands::Container { action } => match action {
            ContainerAction::List { project } => {
                cmd_container_list(&Orchestrator::for_project(&project.project_dir)).await
            }
        },
    }
}

/// Run the full start sequence
async fn cmd_lab_start(orchestrator: &Orchestrator, project_dir: &Path) -> Result<()> {
    info!(project = %project_dir.display(), "Starting lab");

    let result = orchestrator.run(project_dir).await;
    if !result.success {
        bail!("Lab start failed: {}", result.error);
    }

    println!("Lab started successfully.");
    Ok(())
}

async fn cmd_lab_stop(orchestrator: &Orchestrator, project_dir: &Path, volumes: bool) -> Result<()> {
    info!(volumes, "Stopping lab");

    let result = orchestrator.stop(project_dir, volumes).await;
    if !result.success {
        bail!("Lab stop failed: {}", result.error);
    }

    println!("Lab stopped successfully.");
    Ok(())
}

async fn cmd_lab_status(orchestrator: &Orchestrator) -> Result<()> {
    let status = orchestrator.status().await;

    if !status.running {
        println!("Lab is not running.");
        if !status.error.is_empty() {
            println!("Error: {}", status.error);
        }
        return Ok(());
    }

    println!("Lab is running.");
    for container in &status.containers {
        if container.health.is_empty() {
            println!("  {}: {}", container.name, container.state);
        } else {
            println!("  {}: {} ({})", container.name, container.state, container.health);
        }
    }
    Ok(())
}

/// Probe every container and fail unless all are healthy
async fn cmd_lab_health(
    orchestrator: &Orchestrator,
    retries: u32,
    retry_delay: Duration,
) -> Result<()> {
    let summary = orchestrator.health(retries, retry_delay).await;

    for result in &summary.results {
        let marker = if result.healthy { "ok" } else { "!!" };
        match &result.error {
            Some(error) => println!("  [{marker}] {}: {} ({error})", result.unit_name, result.status),
            None => println!("  [{marker}] {}: {}", result.unit_name, result.status),
        }
    }
    println!(
        "{} healthy, {} unhealthy",
        summary.healthy_count, summary.unhealthy_count
    );

    if !summary.all_healthy {
        bail!("Lab is not healthy");
    }
    Ok(())
}

fn load_project_config(project_dir: &Path) -> Result<(PathBuf, LabConfig)> {
    let path = find_config(project_dir)
        .with_context(|| format!("Config file aptl.json not found in {}", project_dir.display()))?;
    let config = load_config(&path).context("Failed to load config")?;
    Ok((path, config))
}

fn cmd_config_show(project_dir: &Path) -> Result<()> {
    let (path, config) = load_project_config(project_dir)?;

    println!("# {}", path.display());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_config_validate(project_dir: &Path) -> Result<()> {
    let (path, config) = load_project_config(project_dir)?;

    println!("Configuration is valid: {}", path.display());
    println!("  Lab name: {}", config.lab.name);
    println!("  Network subnet: {}", config.lab.network_subnet);
    println!(
        "  Enabled profiles: {}",
        config.containers.enabled_profiles().join(", ")
    );
    Ok(())
}

async fn cmd_container_list(orchestrator: &Orchestrator) -> Result<()> {
    let status = orchestrator.status().await;
    if !status.error.is_empty() {
        bail!("Could not list containers: {}", status.error);
    }

    if status.containers.is_empty() {
        println!("No lab containers found.");
        return Ok(());
    }

    println!("{:<32} {:<16} {:<10} {:<10}", "NAME", "SERVICE", "STATE", "HEALTH");
    for container in &status.containers {
        println!(
            "{:<32} {:<16} {:<10} {:<10}",
            container.name, container.service, container.state, container.health
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aptl_core::fakes::{FakeCertProvisioner, FakeKeyProvisioner, FakeRuntime, ScriptedExecutor};
    use aptl_core::{ContainerSummary, LabStatus};
    use std::sync::Arc;

    fn orchestrator(runtime: Arc<FakeRuntime>) -> Orchestrator {
        Orchestrator::new(
            Arc::new(ScriptedExecutor::new()),
            runtime,
            Arc::new(FakeKeyProvisioner::new()),
            Arc::new(FakeCertProvisioner::new()),
        )
    }

    #[test]
    fn test_parse_lab_stop_flags() {
        let cli = Cli::try_parse_from(["aptl", "-v", "lab", "stop", "--volumes", "-d", "/srv/aptl"])
            .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Lab {
                action: LabAction::Stop { volumes, project },
            } => {
                assert!(volumes);
                assert_eq!(project.project_dir, PathBuf::from("/srv/aptl"));
            }
            _ => panic!("expected lab stop"),
        }
    }

    #[test]
    fn test_parse_health_defaults() {
        let cli = Cli::try_parse_from(["aptl", "lab", "health", "--json"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Lab {
                action:
                    LabAction::Health {
                        retries,
                        retry_delay,
                        project,
                    },
            } => {
                assert_eq!(retries, 3);
                assert_eq!(retry_delay, 2);
                assert_eq!(project.project_dir, PathBuf::from("."));
            }
            _ => panic!("expected lab health"),
        }
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(Cli::try_parse_from(["aptl", "lab", "restart"]).is_err());
    }

    #[tokio::test]
    async fn test_lab_start_failure_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(Arc::new(FakeRuntime::new()));

        let err = cmd_lab_start(&orchestrator, dir.path()).await.unwrap_err();
        assert!(err.to_string().starts_with("Lab start failed:"));
    }

    #[tokio::test]
    async fn test_lab_stop_uses_fallback_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());

        cmd_lab_stop(&orchestrator(runtime.clone()), dir.path(), true)
            .await
            .unwrap();
        assert_eq!(runtime.stops().len(), 1);
        assert_eq!(runtime.stops()[0].0.len(), 4);
    }

    #[tokio::test]
    async fn test_health_fails_without_containers() {
        let runtime = Arc::new(FakeRuntime::new());
        let result = cmd_lab_health(&orchestrator(runtime), 1, Duration::ZERO).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_health_passes_when_all_healthy() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_status(LabStatus {
            running: true,
            containers: vec![ContainerSummary {
                name: "aptl-kali-1".to_string(),
                ..ContainerSummary::default()
            }],
            error: String::new(),
        });
        runtime.add_unit("aptl-kali-1", "running", None);

        cmd_lab_health(&orchestrator(runtime), 1, Duration::ZERO)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_container_list_reports_runtime_error() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_status(LabStatus {
            error: "Cannot connect to the Docker daemon".to_string(),
            ..LabStatus::default()
        });

        let err = cmd_container_list(&orchestrator(runtime)).await.unwrap_err();
        assert!(err.to_string().contains("Docker daemon"));
    }

    #[test]
    fn test_config_validate() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cmd_config_validate(dir.path()).is_err());

        std::fs::write(dir.path().join("aptl.json"), r#"{"lab": {"name": "purple"}}"#).unwrap();
        cmd_config_validate(dir.path()).unwrap();
        cmd_config_show(dir.path()).unwrap();

        std::fs::write(dir.path().join("aptl.json"), r#"{"lab": {"name": "-bad"}}"#).unwrap();
        assert!(cmd_config_validate(dir.path()).is_err());
    }
}
