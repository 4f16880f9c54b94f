//! Miscellaneous helper utilities.
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};

/// Ensure a file path's parent directory exists.
pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Millisecond-precision UTC timestamp, e.g. `2024-05-01T10:00:00.000Z`.
#[must_use]
pub fn iso8601_millis(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}
