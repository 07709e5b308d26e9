//! APTL Core Library
//!
//! Lifecycle orchestration for the Advanced Purple Team Lab: a single-host,
//! multi-container security lab driven through `docker compose`.
//!
//! ## Key Components
//!
//! - `Orchestrator`: the twelve-step start sequence plus stop/status/health
//! - `Pipeline`: ordered steps with critical and best-effort failure policy
//! - `ReadinessPoller`: bounded retry-until-ready over an arbitrary check
//! - `check_unit` / `aggregate`: per-container health and the overall verdict
//! - `CommandExecutor` / `RuntimeClient`: the process and runtime seams

pub mod certs;
pub mod config;
pub mod connections;
pub mod credentials;
pub mod env;
mod error;
pub mod exec;
pub mod fakes;
pub mod fsutil;
pub mod health;
pub mod orchestrator;
pub mod pipeline;
pub mod readiness;
mod result;
pub mod runtime;
pub mod ssh;
pub mod sysreqs;
pub mod telemetry;

pub use certs::{CertProvisioner, CertResult, ComposeCertProvisioner};
pub use config::{find_config, load_config, ContainerSettings, LabConfig, LabSettings};
pub use env::{load_dotenv, load_lab_secrets, LabSecrets};
pub use error::{LabError, Result};
pub use exec::{CommandExecutor, CommandOutput, CommandSpec, ProcessExecutor};
pub use health::{aggregate, check_unit, HealthResult, HealthSummary};
pub use orchestrator::{Orchestrator, OrchestratorOptions};
pub use pipeline::{
    Pipeline, PipelineOutcome, StepAction, StepFuture, StepPolicy, StepRecord, StepSpec,
    StepStatus,
};
pub use readiness::{ReadinessPoller, ServiceResult};
pub use result::LabResult;
pub use runtime::{ComposeRuntime, ContainerSummary, LabStatus, RuntimeClient, UnitDescriptor};
pub use ssh::{KeyProvisioner, SshKeyResult, SshKeygenProvisioner};
pub use sysreqs::{check_max_map_count, SysReqResult};
pub use telemetry::init_tracing;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
