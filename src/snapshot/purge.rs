// Snapshot directory janitor.
//
// Grounded on `original_source/utils/pkg/fileutil/purge.go`'s `purgeFile`:
// sort matching files, then remove the oldest ones past the retention
// count, skipping any file currently advisory-locked (i.e. mid-write) so
// a slow `save` never loses a race with its own janitor.

use crate::error::Result;
use fs2::FileExt;
use std::path::{Path, PathBuf};

/// Remove `.snap` files beyond the newest `max_files`, oldest first.
/// Returns the paths actually removed.
pub fn purge_snapshots(dir: &Path, max_files: usize) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".snap"))
        .collect();
    names.sort();

    let mut removed = Vec::new();
    while names.len() > max_files {
        let victim = names.remove(0);
        let path = dir.join(&victim);
        let file = match std::fs::OpenOptions::new().write(true).open(&path) {
            Ok(f) => f,
            Err(_) => continue,
        };
        if file.try_lock_exclusive().is_err() {
            // Someone else (a concurrent save or another purge pass) has
            // this file open; leave it for next time rather than block.
            continue;
        }
        if std::fs::remove_file(&path).is_ok() {
            removed.push(path);
        }
        let _ = FileExt::unlock(&file);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_newest_n_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5u32 {
            std::fs::write(dir.path().join(format!("{i:016x}-0000000000000000.snap")), b"x").unwrap();
        }
        let removed = purge_snapshots(dir.path(), 2).unwrap();
        assert_eq!(removed.len(), 3);
        let remaining: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn under_the_limit_removes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0000000000000000-0000000000000000.snap"), b"x").unwrap();
        let removed = purge_snapshots(dir.path(), 5).unwrap();
        assert!(removed.is_empty());
    }
}
