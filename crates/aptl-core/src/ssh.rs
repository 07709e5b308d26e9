//! SSH key provisioning for lab container access.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::error::{LabError, Result};
use crate::exec::{CommandExecutor, CommandSpec};
use crate::fsutil::set_mode;

/// File name of the lab key pair inside the host SSH directory.
pub const KEY_NAME: &str = "aptl_lab_key";

const KEY_COMMENT: &str = "aptl-local-lab";

/// Outcome of [`KeyProvisioner::ensure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshKeyResult {
    /// Whether a new key pair was generated on this call.
    pub generated: bool,
    /// Path of the private key.
    pub key_path: PathBuf,
}

/// Ensures a key pair exists and its public half is distributed.
#[async_trait]
pub trait KeyProvisioner: Send + Sync {
    /// Reuse the pair in `host_ssh_dir` or generate one, then mirror the
    /// public key into `keys_dir` as `<name>.pub` and `authorized_keys`.
    async fn ensure(&self, keys_dir: &Path, host_ssh_dir: &Path) -> Result<SshKeyResult>;
}

/// Generates ed25519 keys with `ssh-keygen`.
pub struct SshKeygenProvisioner {
    executor: Arc<dyn CommandExecutor>,
}

impl SshKeygenProvisioner {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl KeyProvisioner for SshKeygenProvisioner {
    async fn ensure(&self, keys_dir: &Path, host_ssh_dir: &Path) -> Result<SshKeyResult> {
        std::fs::create_dir_all(keys_dir)?;
        std::fs::create_dir_all(host_ssh_dir)?;

        let private_key = host_ssh_dir.join(KEY_NAME);
        let public_key = host_ssh_dir.join(format!("{KEY_NAME}.pub"));

        let mut generated = false;
        if private_key.exists() {
            debug!(path = %private_key.display(), "SSH key already exists");
        } else {
            info!(path = %private_key.display(), "Generating new SSH key pair");
            let key_arg = private_key.to_string_lossy().to_string();
            let spec = CommandSpec::new("ssh-keygen").args([
                "-t",
                "ed25519",
                "-f",
                key_arg.as_str(),
                "-N",
                "",
                "-C",
                KEY_COMMENT,
            ]);
            let out = self.executor.run(&spec).await?;
            if !out.success() {
                let err = out.error_message("ssh-keygen failed");
                error!(error = %err, "ssh-keygen failed");
                return Err(LabError::tool("ssh-keygen", err));
            }
            generated = true;
        }

        if !public_key.exists() {
            return Err(LabError::Validation(format!(
                "public key not found at {}",
                public_key.display()
            )));
        }

        set_mode(&private_key, 0o600)?;
        set_mode(&public_key, 0o644)?;

        let pub_content = std::fs::read(&public_key)?;
        std::fs::write(keys_dir.join(format!("{KEY_NAME}.pub")), &pub_content)?;
        std::fs::write(keys_dir.join("authorized_keys"), &pub_content)?;
        debug!(dir = %keys_dir.display(), "Public key distributed");

        Ok(SshKeyResult {
            generated,
            key_path: private_key,
        })
    }
}
