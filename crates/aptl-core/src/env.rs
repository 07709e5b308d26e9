//! Secrets loading from `.env` files.
//!
//! The format is a plain `KEY=VALUE` list:
//! - blank lines and `#` comments are skipped, as are lines without `=`
//! - an optional leading `export ` is stripped
//! - the line is split on the first `=` only, so values may contain `=`
//! - matching surrounding single or double quotes are removed from values

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use tracing::debug;

use crate::error::{LabError, Result};

/// Keys that must be present and non-empty.
pub const REQUIRED_VARS: &[&str] = &[
    "INDEXER_USERNAME",
    "INDEXER_PASSWORD",
    "API_USERNAME",
    "API_PASSWORD",
];

/// Typed secrets for the lab services.
#[derive(Clone, PartialEq, Eq)]
pub struct LabSecrets {
    pub indexer_username: String,
    pub indexer_password: String,
    pub api_username: String,
    pub api_password: String,
    pub dashboard_username: String,
    pub dashboard_password: String,
    pub wazuh_cluster_key: String,
}

impl fmt::Debug for LabSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabSecrets")
            .field("indexer_username", &self.indexer_username)
            .field("indexer_password", &"<redacted>")
            .field("api_username", &self.api_username)
            .field("api_password", &"<redacted>")
            .field("dashboard_username", &self.dashboard_username)
            .field("dashboard_password", &"<redacted>")
            .field("wazuh_cluster_key", &"<redacted>")
            .finish()
    }
}

/// Parse `.env` content into a key/value map.
pub fn parse_dotenv(content: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            debug!(line, "Skipping line without '='");
            continue;
        };

        vars.insert(key.trim().to_string(), unquote(value.trim()).to_string());
    }

    vars
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Read and parse a `.env` file.
pub fn load_dotenv(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Err(LabError::Validation(format!(
            ".env file not found: {}",
            path.display()
        )));
    }

    let vars = parse_dotenv(&std::fs::read_to_string(path)?);
    debug!(count = vars.len(), path = %path.display(), "Loaded environment variables");
    Ok(vars)
}

/// Names from `required` that are absent or empty in `env`.
pub fn missing_required(env: &BTreeMap<String, String>, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|key| env.get(**key).map_or(true, |v| v.is_empty()))
        .map(|key| key.to_string())
        .collect()
}

impl LabSecrets {
    /// Build secrets from a parsed env map, rejecting missing required keys.
    pub fn from_env_map(env: &BTreeMap<String, String>) -> Result<Self> {
        let missing = missing_required(env, REQUIRED_VARS);
        if !missing.is_empty() {
            return Err(LabError::MissingCredentials(missing));
        }

        let get = |key: &str, default: &str| {
            env.get(key)
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            indexer_username: get("INDEXER_USERNAME", ""),
            indexer_password: get("INDEXER_PASSWORD", ""),
            api_username: get("API_USERNAME", ""),
            api_password: get("API_PASSWORD", ""),
            dashboard_username: get("DASHBOARD_USERNAME", "kibanaserver"),
            dashboard_password: get("DASHBOARD_PASSWORD", ""),
            wazuh_cluster_key: get("WAZUH_CLUSTER_KEY", ""),
        })
    }
}

/// Load and validate lab secrets from a `.env` file.
pub fn load_lab_secrets(path: &Path) -> Result<LabSecrets> {
    LabSecrets::from_env_map(&load_dotenv(path)?)
}
