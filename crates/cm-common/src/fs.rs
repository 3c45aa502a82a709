//! Filesystem helpers

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::{Error, Result};

/// Write `contents` to `path` so readers see either the old file or the new
/// one, never a partial write.
///
/// The temp file is created next to the target so the final rename stays on
/// one filesystem. Missing parent directories are created.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .map_err(|e| Error::context_persist(path, format!("create parent directory: {e}")))?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|e| Error::context_persist(path, format!("create temp file: {e}")))?;
    tmp.write_all(contents)
        .map_err(|e| Error::context_persist(path, format!("write temp file: {e}")))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::context_persist(path, format!("sync temp file: {e}")))?;
    tmp.persist(path)
        .map_err(|e| Error::context_persist(path, format!("rename into place: {}", e.error)))?;
    Ok(())
}
