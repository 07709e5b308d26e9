//! Lab configuration (`aptl.json`) loading and validation.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LabError, Result};

/// File names searched for by [`find_config`].
pub const CONFIG_FILENAMES: &[&str] = &["aptl.json"];

/// Profiles used by `stop` when no configuration can be loaded.
pub const FALLBACK_PROFILES: &[&str] = &["wazuh", "victim", "kali", "reverse"];

/// Lab-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LabSettings {
    pub name: String,
    pub network_subnet: String,
}

fn default_subnet() -> String {
    "172.20.0.0/16".to_string()
}

impl Default for LabSettings {
    fn default() -> Self {
        Self {
            name: "aptl".to_string(),
            network_subnet: default_subnet(),
        }
    }
}

/// Which optional containers are enabled. Each field maps to a compose profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContainerSettings {
    pub wazuh: bool,
    pub victim: bool,
    pub kali: bool,
    pub reverse: bool,
    pub enterprise: bool,
    pub soc: bool,
    pub mail: bool,
    pub fileshare: bool,
    pub dns: bool,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            wazuh: true,
            victim: true,
            kali: true,
            reverse: false,
            enterprise: false,
            soc: false,
            mail: false,
            fileshare: false,
            dns: false,
        }
    }
}

impl ContainerSettings {
    /// Compose profile names for enabled containers, in a fixed order.
    pub fn enabled_profiles(&self) -> Vec<String> {
        [
            ("wazuh", self.wazuh),
            ("victim", self.victim),
            ("kali", self.kali),
            ("reverse", self.reverse),
            ("enterprise", self.enterprise),
            ("soc", self.soc),
            ("mail", self.mail),
            ("fileshare", self.fileshare),
            ("dns", self.dns),
        ]
        .into_iter()
        .filter(|(_, enabled)| *enabled)
        .map(|(name, _)| name.to_string())
        .collect()
    }
}

/// Top-level lab configuration. Unknown top-level keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    pub lab: LabSettings,
    pub containers: ContainerSettings,
}

impl LabConfig {
    /// Check field-level constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        validate_lab_name(&self.lab.name)?;
        validate_subnet(&self.lab.network_subnet)
    }
}

fn validate_lab_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(LabError::Validation("lab name must not be empty".to_string()));
    }

    let mut chars = name.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !first_ok || !rest_ok {
        return Err(LabError::Validation(format!(
            "lab name '{name}' is invalid. Use only alphanumeric characters, dots, \
             hyphens, and underscores. Must start with an alphanumeric character."
        )));
    }
    Ok(())
}

fn validate_subnet(subnet: &str) -> Result<()> {
    let invalid = || LabError::Validation(format!("network_subnet '{subnet}' is not an IPv4 CIDR"));

    let (addr, prefix) = subnet.split_once('/').ok_or_else(invalid)?;
    addr.parse::<Ipv4Addr>().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    if prefix > 32 {
        return Err(invalid());
    }
    Ok(())
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<LabConfig> {
    if !path.exists() {
        return Err(LabError::Validation(format!(
            "config file not found: {}",
            path.display()
        )));
    }

    let raw = std::fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Err(LabError::Validation(format!(
            "config file is empty: {}",
            path.display()
        )));
    }

    let config: LabConfig = serde_json::from_str(&raw).map_err(|e| {
        LabError::Validation(format!("invalid config in {}: {e}", path.display()))
    })?;
    config.validate()?;

    debug!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Look for a configuration file in `search_dir`.
pub fn find_config(search_dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| search_dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("aptl.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_defaults_enable_core_profiles() {
        let config = LabConfig::default();
        assert_eq!(config.lab.name, "aptl");
        assert_eq!(config.lab.network_subnet, "172.20.0.0/16");
        assert_eq!(
            config.containers.enabled_profiles(),
            vec!["wazuh", "victim", "kali"]
        );
    }

    #[test]
    fn test_enabled_profiles_preserve_order() {
        let containers = ContainerSettings {
            wazuh: false,
            dns: true,
            reverse: true,
            ..ContainerSettings::default()
        };
        assert_eq!(
            containers.enabled_profiles(),
            vec!["victim", "kali", "reverse", "dns"]
        );
    }

    #[test]
    fn test_load_valid_config() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{"lab": {"name": "purple-1"}, "containers": {"reverse": true}, "extra": 1}"#,
        );

        let config = load_config(&path).unwrap();
        assert_eq!(config.lab.name, "purple-1");
        assert!(config.containers.reverse);
        assert!(config.containers.wazuh);
    }

    #[test]
    fn test_unknown_section_key_rejected() {
        let dir = tempdir().unwrap();
        let path = write_config(dir.path(), r#"{"containers": {"splunk": true}}"#);
        assert!(matches!(load_config(&path), Err(LabError::Validation(_))));

        let path = write_config(dir.path(), r#"{"lab": {"name": "x", "owner": "me"}}"#);
        assert!(matches!(load_config(&path), Err(LabError::Validation(_))));
    }

    #[test]
    fn test_invalid_lab_name_rejected() {
        let dir = tempdir().unwrap();
        let path = write_config(dir.path(), r#"{"lab": {"name": "-bad name"}}"#);
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("-bad name"));
    }

    #[test]
    fn test_invalid_subnet_rejected() {
        for subnet in ["172.20.0.0", "172.20.0.0/33", "999.1.1.1/16", "abc/8"] {
            let dir = tempdir().unwrap();
            let body = format!(r#"{{"lab": {{"name": "aptl", "network_subnet": "{subnet}"}}}}"#);
            let path = write_config(dir.path(), &body);
            assert!(load_config(&path).is_err(), "subnet {subnet} should fail");
        }
    }

    #[test]
    fn test_empty_and_missing_files() {
        let dir = tempdir().unwrap();
        assert!(load_config(&dir.path().join("aptl.json")).is_err());

        let path = write_config(dir.path(), "   \n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("empty"));

        let path = write_config(dir.path(), "{not json");
        assert!(matches!(load_config(&path), Err(LabError::Validation(_))));
    }

    #[test]
    fn test_find_config() {
        let dir = tempdir().unwrap();
        assert!(find_config(dir.path()).is_none());
        write_config(dir.path(), "{}");
        assert_eq!(find_config(dir.path()), Some(dir.path().join("aptl.json")));
    }
}
