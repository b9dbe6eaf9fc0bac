//! Atomic file replacement.

use std::fs::Permissions;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{EngineError, Result};

/// Replace `path` with `contents` so readers see either the old or the new
/// file, never a partial one.
///
/// The data goes to a temporary file in the same directory, is flushed to
/// disk with `mode` applied, then renamed over the destination.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let display = path.display().to_string();
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    std::fs::create_dir_all(dir).map_err(|e| EngineError::io(dir.display().to_string(), e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| EngineError::io(&display, e))?;
    tmp.write_all(contents).map_err(|e| EngineError::io(&display, e))?;
    tmp.as_file()
        .set_permissions(Permissions::from_mode(mode))
        .map_err(|e| EngineError::io(&display, e))?;
    tmp.as_file().sync_all().map_err(|e| EngineError::io(&display, e))?;
    tmp.persist(path).map_err(|e| EngineError::io(&display, e.error))?;

    Ok(())
}
