//! TLS certificate provisioning for the indexer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::{LabError, Result};
use crate::exec::{CommandExecutor, CommandSpec};

/// Certificate directory, relative to the project root.
pub const CERTS_SUBDIR: &str = "config/wazuh_indexer_ssl_certs";

/// Compose file that defines the certificate generator service.
pub const CERT_COMPOSE_FILE: &str = "generate-indexer-certs.yml";

/// Outcome of [`CertProvisioner::ensure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertResult {
    pub generated: bool,
    pub certs_dir: PathBuf,
}

/// Ensures certificate material exists under a project root.
#[async_trait]
pub trait CertProvisioner: Send + Sync {
    async fn ensure(&self, project_dir: &Path) -> Result<CertResult>;
}

/// Runs the compose-defined generator, then hands ownership of the output
/// back to the invoking user.
pub struct ComposeCertProvisioner {
    executor: Arc<dyn CommandExecutor>,
    program: String,
}

impl ComposeCertProvisioner {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            program: "docker".to_string(),
        }
    }

    async fn id(&self, flag: &str) -> Result<String> {
        let out = self.executor.run(&CommandSpec::new("id").arg(flag)).await?;
        if !out.success() {
            return Err(LabError::tool("id", out.error_message("id failed")));
        }
        Ok(out.stdout.trim().to_string())
    }

    async fn fix_ownership(&self, project_dir: &Path, certs_dir: &Path) -> Result<()> {
        let owner = format!("{}:{}", self.id("-u").await?, self.id("-g").await?);
        let spec = CommandSpec::new("sudo")
            .args(["chown", "-R", owner.as_str()])
            .arg(certs_dir.to_string_lossy())
            .current_dir(project_dir);

        let out = self.executor.run(&spec).await?;
        if !out.success() {
            return Err(LabError::tool("chown", out.error_message("Permission fix failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl CertProvisioner for ComposeCertProvisioner {
    async fn ensure(&self, project_dir: &Path) -> Result<CertResult> {
        let certs_dir = project_dir.join(CERTS_SUBDIR);

        if certs_dir.exists() {
            info!(path = %certs_dir.display(), "SSL certificates already exist");
            return Ok(CertResult {
                generated: false,
                certs_dir,
            });
        }

        info!("Generating SSL certificates");
        let spec = CommandSpec::new(&self.program)
            .args(["compose", "-f", CERT_COMPOSE_FILE, "run", "--rm", "generator"])
            .current_dir(project_dir);
        let out = self.executor.run(&spec).await?;
        if !out.success() {
            let err = out.error_message("Certificate generation failed");
            error!(error = %err, "Certificate generation failed");
            return Err(LabError::tool("certificate generator", err));
        }

        info!("Fixing certificate permissions");
        self.fix_ownership(project_dir, &certs_dir).await?;

        info!(path = %certs_dir.display(), "SSL certificates generated");
        Ok(CertResult {
            generated: true,
            certs_dir,
        })
    }
}
