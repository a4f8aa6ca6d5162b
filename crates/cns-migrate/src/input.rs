//! Reading the list of persistent volumes to migrate.

use std::path::Path;

use crate::error::{MigrateError, Result};

/// Splits `contents` into trimmed persistent-volume names.
///
/// Blank lines are dropped. Order and duplicates are preserved so every
/// non-blank line yields exactly one migration attempt.
pub fn parse_volume_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reads the volume list at `path`, failing if it is unreadable or names no volumes.
pub fn read_volume_list(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| MigrateError::Input(format!("error reading file {}: {}", path.display(), e)))?;
    let names = parse_volume_list(&contents);
    if names.is_empty() {
        return Err(MigrateError::Input(format!(
            "file {} has no listed volumes",
            path.display()
        )));
    }
    Ok(names)
}
