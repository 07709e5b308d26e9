//! Credential templating into service configuration files.
//!
//! Patterns only locate the spans to replace. The replacement text is built
//! from the secret as opaque data, so `$1`, `\1` or `${name}` inside a
//! password are written literally.

use std::path::Path;

use regex::{Captures, Regex};
use tracing::{info, warn};

use crate::error::{LabError, Result};
use crate::fsutil::write_atomic;

const PASSWORD_PATTERN: &str = r#"(password:\s*)"[^"]*""#;
const KEY_PATTERN: &str = r"<key>[^<]*</key>";

/// Replace the quoted value of every `password: "..."` with `password`.
///
/// Returns the new content and the number of replacements.
pub fn replace_quoted_passwords(content: &str, password: &str) -> Result<(String, usize)> {
    let re = compiled(PASSWORD_PATTERN)?;
    let mut count = 0;
    let replaced = re.replace_all(content, |caps: &Captures<'_>| {
        count += 1;
        format!("{}\"{}\"", &caps[1], password)
    });
    Ok((replaced.into_owned(), count))
}

/// Replace the text of every `<key>...</key>` element with `key`.
pub fn replace_key_elements(content: &str, key: &str) -> Result<(String, usize)> {
    let re = compiled(KEY_PATTERN)?;
    let mut count = 0;
    let replaced = re.replace_all(content, |_: &Captures<'_>| {
        count += 1;
        format!("<key>{key}</key>")
    });
    Ok((replaced.into_owned(), count))
}

fn compiled(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| LabError::Validation(format!("bad pattern {pattern}: {e}")))
}

fn sync_file(
    config_path: &Path,
    what: &str,
    replace: impl FnOnce(&str) -> Result<(String, usize)>,
) -> Result<usize> {
    if !config_path.exists() {
        return Err(LabError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{what} config not found: {}", config_path.display()),
        )));
    }

    let content = std::fs::read_to_string(config_path)?;
    let (updated, count) = replace(&content)?;

    if count == 0 {
        warn!(path = %config_path.display(), "No {what} pattern found; file left unchanged");
        return Ok(0);
    }

    write_atomic(config_path, updated.as_bytes(), None)?;
    info!(path = %config_path.display(), count, "Synced {what} credentials");
    Ok(count)
}

/// Inject the API password into the dashboard config (`wazuh.yml`).
pub fn sync_dashboard_config(config_path: &Path, api_password: &str) -> Result<usize> {
    sync_file(config_path, "dashboard", |content| {
        replace_quoted_passwords(content, api_password)
    })
}

/// Inject the cluster key into the manager config (`wazuh_manager.conf`).
pub fn sync_manager_config(config_path: &Path, cluster_key: &str) -> Result<usize> {
    sync_file(config_path, "manager", |content| {
        replace_key_elements(content, cluster_key)
    })
}
