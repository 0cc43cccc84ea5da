// JSON snapshots on disk
//
// Written to a sibling temp file and renamed over the target, so a reader
// sees either the previous or the new snapshot.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Load a snapshot; `None` when nothing was written yet
pub(crate) fn load<T: DeserializeOwned>(path: &Path, what: &str) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} {}", what, path.display()))?;
    let snapshot = serde_json::from_str(&contents).with_context(|| format!("Failed to parse {} JSON", what))?;
    Ok(Some(snapshot))
}

pub(crate) fn write<T: Serialize>(path: &Path, snapshot: &T, what: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let temp_path = path.with_extension("tmp");
    let json = serde_json::to_string_pretty(snapshot).with_context(|| format!("Failed to serialize {}", what))?;
    fs::write(&temp_path, json).with_context(|| format!("Failed to write to {}", temp_path.display()))?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {} to {}", temp_path.display(), path.display()))?;
    Ok(())
}
