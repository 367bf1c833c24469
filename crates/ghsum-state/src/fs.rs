//! Atomic file replacement shared by the state store, the summary cache and
//! the output publisher.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::StateError;

/// Write `data` to `path` so readers only ever observe the old or the new
/// content. Creates the parent directory if needed.
///
/// Blocking; call from `spawn_blocking` in async contexts.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StateError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| StateError::io(dir, e))?;

    // Temp file in the same directory so the rename never crosses filesystems.
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StateError::io(dir, e))?;
    tmp.write_all(data).map_err(|e| StateError::io(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StateError::io(path, e))?;
    tmp.persist(path).map_err(|e| StateError::io(path, e.error))?;
    Ok(())
}

/// Read a file, mapping "not found" to `None`.
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StateError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StateError::io(path, e)),
    }
}
