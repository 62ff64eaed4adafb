//! Snapshot persistence.
//!
//! Grounded on `original_source/utils/api/snap/snapshotter.go`: snapshots
//! are named `<term:016x>-<index:016x>.snap`, written atomically
//! (tempfile, fsync, rename) with a CRC32C-Castagnoli checksum wrapping
//! the payload, and loaded newest-first with a fallback to the next
//! older file if the newest one is corrupt. A `.broken` rename marks a
//! file that failed validation so it is never retried.

mod purge;

pub use purge::purge_snapshots;

use crate::consensus::Snapshot;
use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

const SNAP_SUFFIX: &str = "snap";
const BINCODE_CONFIG: bincode::config::Configuration = bincode::config::standard();

/// On-disk envelope: a CRC32C of the encoded snapshot, computed
/// independently of bincode's own framing so corruption anywhere in the
/// encoded bytes is caught before `Snapshot` is even deserialized.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    crc: u32,
    data: Vec<u8>,
}

pub struct Snapshotter {
    dir: PathBuf,
}

impl Snapshotter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_name(snapshot: &Snapshot) -> String {
        format!(
            "{:016x}-{:016x}.{SNAP_SUFFIX}",
            snapshot.metadata.term, snapshot.metadata.index
        )
    }

    /// Save `snapshot` atomically. A no-op for an empty snapshot, mirroring
    /// the Go driver's `IsEmptySnap` short-circuit in `saveSnap`.
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if snapshot.is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir)?;

        let data = bincode::serde::encode_to_vec(snapshot, BINCODE_CONFIG)
            .map_err(|e| NodeError::Encode(e.to_string()))?;
        let crc = crc32c::crc32c(&data);
        let envelope = Envelope { crc, data };
        let encoded = bincode::serde::encode_to_vec(&envelope, BINCODE_CONFIG)
            .map_err(|e| NodeError::Encode(e.to_string()))?;

        let final_path = self.dir.join(Self::file_name(snapshot));
        let tmp_path = final_path.with_extension(format!("{SNAP_SUFFIX}.tmp"));

        let write_result = (|| -> Result<()> {
            let mut f = std::fs::File::create(&tmp_path)?;
            f.write_all(&encoded)?;
            f.sync_all()?;
            std::fs::rename(&tmp_path, &final_path)?;
            Ok(())
        })();

        if write_result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        }
        write_result
    }

    /// Load the newest valid snapshot, falling back to the next-oldest
    /// file if a newer one fails CRC validation. Files that fail
    /// validation are renamed to `<name>.broken` so they are skipped on
    /// future calls instead of being retried forever.
    pub fn load(&self) -> Result<Snapshot> {
        let names = self.snap_names_newest_first()?;
        for name in names {
            let path = self.dir.join(&name);
            match read_snapshot(&path) {
                Ok(snap) => return Ok(snap),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "snapshot file failed validation");
                    let broken = path.with_extension(format!("{SNAP_SUFFIX}.broken"));
                    let _ = std::fs::rename(&path, &broken);
                }
            }
        }
        Err(NodeError::NoSnapshot)
    }

    fn snap_names_newest_first(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(&format!(".{SNAP_SUFFIX}")) {
                names.push(name);
            }
        }
        names.sort();
        names.reverse();
        Ok(names)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let bytes = std::fs::read(path)?;
    if bytes.is_empty() {
        return Err(NodeError::Snapshot(format!("{} is empty", path.display())));
    }
    let (envelope, _): (Envelope, _) = bincode::serde::decode_from_slice(&bytes, BINCODE_CONFIG)
        .map_err(|e| NodeError::Decode(e.to_string()))?;
    let actual = crc32c::crc32c(&envelope.data);
    if actual != envelope.crc {
        return Err(NodeError::CrcMismatch { expected: envelope.crc, actual });
    }
    let (snap, _): (Snapshot, _) = bincode::serde::decode_from_slice(&envelope.data, BINCODE_CONFIG)
        .map_err(|e| NodeError::Decode(e.to_string()))?;
    Ok(snap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{ConfState, SnapshotMetadata};

    fn snap(term: u64, index: u64) -> Snapshot {
        let mut cs = ConfState::default();
        cs.add(1);
        Snapshot { metadata: SnapshotMetadata { term, index }, conf_state: cs, data: vec![9, 9, 9] }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = Snapshotter::new(dir.path());
        snapshotter.save(&snap(1, 100)).unwrap();
        let loaded = snapshotter.load().unwrap();
        assert_eq!(loaded.metadata.index, 100);
        assert_eq!(loaded.data, vec![9, 9, 9]);
    }

    #[test]
    fn load_falls_back_to_older_snapshot_on_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = Snapshotter::new(dir.path());
        snapshotter.save(&snap(1, 100)).unwrap();
        snapshotter.save(&snap(2, 200)).unwrap();

        let newest_path = dir.path().join("0000000000000002-00000000000000c8.snap");
        std::fs::write(&newest_path, b"not a valid snapshot").unwrap();

        let loaded = snapshotter.load().unwrap();
        assert_eq!(loaded.metadata.index, 100);
        assert!(newest_path.with_extension("snap.broken").exists());
    }

    #[test]
    fn empty_snapshot_is_never_written() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = Snapshotter::new(dir.path());
        snapshotter.save(&Snapshot::default()).unwrap();
        assert!(snapshotter.load().is_err());
    }
}
