//! Durable shutdown-time records

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

/// Two-line record: local wall-clock time, then Unix seconds.
pub fn format_record(now: DateTime<Local>) -> String {
    format!(
        "Shutdown time: {}\nTimestamp: {}\n",
        now.format("%Y-%m-%d %H:%M:%S"),
        now.timestamp()
    )
}

/// Append `record` to `path` and fsync before returning.
///
/// The file is created (with missing parent directories) on first use; earlier
/// records are never truncated.
pub fn append_durably(path: &Path, record: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.write_all(record.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn record_has_both_lines() {
        let now = Local.timestamp_opt(1_700_000_000, 0).unwrap();
        let record = format_record(now);
        let lines: Vec<&str> = record.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Shutdown time: "));
        assert_eq!(lines[1], "Timestamp: 1700000000");
        assert!(record.ends_with('\n'));
    }

    #[test]
    fn appends_without_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shutdown_time.txt");
        append_durably(&path, "first\n").unwrap();
        append_durably(&path, "second\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/stamp.txt");
        append_durably(&path, "x\n").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn unwritable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending.
        let err = append_durably(dir.path(), "x\n").unwrap_err();
        assert!(format!("{err:#}").contains("Failed to open"));
    }
}
