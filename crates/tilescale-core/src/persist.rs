//! JSON persistence for the model registry and the result cache.
//!
//! Writes go to a temp file in the destination directory, are synced, then
//! renamed over the target, so readers see either the old or the new file.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Result, UpscaleError};

/// Read and parse a JSON file.
///
/// Returns `None` if the file doesn't exist.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).map_err(|e| UpscaleError::Io {
        message: format!("Failed to read {}", path.display()),
        path: Some(path.to_path_buf()),
        source: Some(e),
    })?;
    let data = serde_json::from_str(&contents).map_err(|e| UpscaleError::Json {
        message: format!("Failed to parse {}: {}", path.display(), e),
        source: Some(e),
    })?;
    Ok(Some(data))
}

/// Serialize `data` as pretty JSON and atomically replace `path` with it.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| UpscaleError::io_with_path(e, parent))?;

    let serialized = serde_json::to_string_pretty(data).map_err(|e| UpscaleError::Json {
        message: format!("Failed to serialize {}: {}", path.display(), e),
        source: Some(e),
    })?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|e| UpscaleError::Io {
        message: format!("Failed to create temp file in {}", parent.display()),
        path: Some(parent.to_path_buf()),
        source: Some(e),
    })?;
    temp.write_all(serialized.as_bytes())
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| UpscaleError::Io {
            message: format!("Failed to write temp file for {}", path.display()),
            path: Some(temp.path().to_path_buf()),
            source: Some(e),
        })?;

    temp.persist(path).map_err(|e| UpscaleError::Io {
        message: format!("Failed to rename temp file to {}", path.display()),
        path: Some(path.to_path_buf()),
        source: Some(e.error),
    })?;

    debug!("Wrote {}", path.display());
    Ok(())
}
