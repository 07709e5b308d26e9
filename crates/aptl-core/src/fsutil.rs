//! Filesystem helpers shared by the provisioning steps.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{LabError, Result};

/// Replace `path` with `contents` via a temp file in the same directory and
/// a rename, so readers never observe a partially written file.
///
/// `mode` sets the unix permission bits of the final file. Without it, an
/// existing file keeps its permissions.
pub fn write_atomic(path: &Path, contents: &[u8], mode: Option<u32>) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let existing = std::fs::metadata(path).ok().map(|m| m.permissions());

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    match (mode, existing) {
        (Some(mode), _) => set_mode(tmp.path(), mode)?,
        (None, Some(permissions)) => std::fs::set_permissions(tmp.path(), permissions)?,
        (None, None) => {}
    }
    tmp.persist(path).map_err(|e| LabError::Io(e.error))?;
    Ok(())
}

/// Set unix permission bits. No-op on other platforms.
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
