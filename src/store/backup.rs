use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, warn};

use crate::error::{Result, SyncError};

const BACKUP_MARKER: &str = ".backup.";

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `<dir>/<name>.backup.<millis>`
pub fn backup_path(path: &Path, millis: i64) -> PathBuf {
    path.with_file_name(format!("{}{BACKUP_MARKER}{millis}", file_name(path)))
}

/// Parses the millisecond suffix of a sibling backup of `path`.
pub fn backup_suffix(path: &Path, candidate: &str) -> Option<i64> {
    let prefix = format!("{}{BACKUP_MARKER}", file_name(path));
    candidate.strip_prefix(&prefix)?.parse().ok()
}

/// Writes `raw` to a fresh backup next to `path`, never overwriting an
/// existing backup.
pub fn write_backup(path: &Path, raw: &[u8]) -> Result<PathBuf> {
    let mut millis = Utc::now().timestamp_millis();
    let mut target = backup_path(path, millis);
    while target.exists() {
        millis += 1;
        target = backup_path(path, millis);
    }

    fs::write(&target, raw).map_err(|err| SyncError::store_io(&target, err))?;
    debug!("wrote backup {}", target.display());
    Ok(target)
}

/// Sibling backups of `path`, newest first.
pub fn list_backups(path: &Path) -> Result<Vec<(i64, PathBuf)>> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(SyncError::store_io(&dir, err)),
    };

    let mut backups: Vec<(i64, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let millis = backup_suffix(path, &name.to_string_lossy())?;
            Some((millis, entry.path()))
        })
        .collect();

    backups.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(backups)
}

/// Deletes all but the `keep` newest backups. Returns how many were removed.
///
/// A backup that cannot be deleted is logged and skipped.
pub fn cleanup_backups(path: &Path, keep: usize) -> Result<usize> {
    let backups = list_backups(path)?;
    let mut removed = 0;

    for (_, stale) in backups.into_iter().skip(keep) {
        match fs::remove_file(&stale) {
            Ok(()) => removed += 1,
            Err(err) => warn!("failed to delete backup {}: {err}", stale.display()),
        }
    }

    if removed > 0 {
        debug!("removed {removed} old backup(s) of {}", path.display());
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn suffix_parsing_ignores_other_files() {
        let path = Path::new("/data/content.json");
        assert_eq!(backup_suffix(path, "content.json.backup.1700000000123"), Some(1700000000123));
        assert_eq!(backup_suffix(path, "content.json.backup.latest"), None);
        assert_eq!(backup_suffix(path, "other.json.backup.12"), None);
        assert_eq!(backup_suffix(path, "content.json"), None);
    }

    #[test]
    fn same_millisecond_backups_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("content.json");

        let first = write_backup(&path, b"one").unwrap();
        let second = write_backup(&path, b"two").unwrap();

        assert_ne!(first, second);
        assert_eq!(fs::read(&first).unwrap(), b"one");
        assert_eq!(fs::read(&second).unwrap(), b"two");
    }

    #[test]
    fn cleanup_keeps_newest_by_numeric_suffix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("content.json");
        // 9 < 10 < 100 numerically, not lexically
        for millis in [9_i64, 10, 100, 1000, 5, 7, 8] {
            fs::write(backup_path(&path, millis), b"x").unwrap();
        }
        fs::write(dir.path().join("unrelated.txt"), b"x").unwrap();

        let removed = cleanup_backups(&path, 5).unwrap();
        assert_eq!(removed, 2);

        let left: Vec<i64> = list_backups(&path).unwrap().into_iter().map(|(m, _)| m).collect();
        assert_eq!(left, vec![1000, 100, 10, 9, 8]);
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[test]
    fn listing_a_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope").join("content.json");
        assert!(list_backups(&path).unwrap().is_empty());
    }
}
