// WAL segment file naming and low-level record I/O.
//
// Grounded on `original_source/utils/api/wal/util.go` (`walName`,
// `parseWALName`, `isValidSeq`): segments are named
// `<seq:016x>-<start-index:016x>.wal` and must form a contiguous sequence
// run so `Wal::open` can detect a missing segment before trusting the
// directory listing.

use crate::error::{NodeError, Result};
use fs2::FileExt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const SEGMENT_EXT: &str = "wal";

pub fn segment_name(seq: u64, start_index: u64) -> String {
    format!("{seq:016x}-{start_index:016x}.{SEGMENT_EXT}")
}

pub fn parse_segment_name(name: &str) -> Option<(u64, u64)> {
    let stem = name.strip_suffix(&format!(".{SEGMENT_EXT}"))?;
    let (seq_hex, idx_hex) = stem.split_once('-')?;
    let seq = u64::from_str_radix(seq_hex, 16).ok()?;
    let idx = u64::from_str_radix(idx_hex, 16).ok()?;
    Some((seq, idx))
}

/// List `.wal` files in `dir`, sorted by sequence number, verifying the
/// sequence run has no gaps.
pub fn list_segments(dir: &Path) -> Result<Vec<(u64, u64, PathBuf)>> {
    let mut found = Vec::new();
    if !dir.exists() {
        return Ok(found);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some((seq, start_index)) = parse_segment_name(&name) {
            found.push((seq, start_index, entry.path()));
        }
    }
    found.sort_by_key(|(seq, _, _)| *seq);
    let mut last_seq = None;
    for (seq, _, path) in &found {
        if let Some(last) = last_seq {
            if *seq != last + 1 {
                return Err(NodeError::WalFatal(format!(
                    "wal segment sequence has a gap before {}",
                    path.display()
                )));
            }
        }
        last_seq = Some(*seq);
    }
    Ok(found)
}

/// An open segment file, buffered for sequential append.
pub struct SegmentWriter {
    pub seq: u64,
    pub start_index: u64,
    path: PathBuf,
    writer: BufWriter<File>,
    len: u64,
}

impl SegmentWriter {
    /// `file` is expected to be freshly created (or renamed into place from
    /// the preallocation pipeline) and not yet locked by anyone else; the
    /// exclusive advisory lock is held for as long as this `SegmentWriter`
    /// stays open, i.e. for the segment's membership in the active log.
    pub fn create(dir: &Path, seq: u64, start_index: u64, file: File) -> Result<Self> {
        let path = dir.join(segment_name(seq, start_index));
        file.try_lock_exclusive().map_err(|e| {
            NodeError::WalFatal(format!("failed to lock wal segment {}: {e}", path.display()))
        })?;
        Ok(Self { seq, start_index, path, writer: BufWriter::new(file), len: 0 })
    }

    pub fn open_append(dir: &Path, seq: u64, start_index: u64) -> Result<Self> {
        let path = dir.join(segment_name(seq, start_index));
        let file = std::fs::OpenOptions::new().append(true).open(&path)?;
        file.try_lock_exclusive().map_err(|e| {
            NodeError::WalFatal(format!("failed to lock wal segment {}: {e}", path.display()))
        })?;
        let len = file.metadata()?.len();
        Ok(Self { seq, start_index, path, writer: BufWriter::new(file), len })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written (or already on disk, for a reopened segment) so far.
    /// Used to decide whether the next batch needs a fresh segment.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.writer.write_all(frame)?;
        self.len += frame.len() as u64;
        Ok(())
    }

    pub fn flush_and_sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }
}

pub struct SegmentReader {
    pub seq: u64,
    pub start_index: u64,
    reader: BufReader<File>,
    offset: u64,
}

impl SegmentReader {
    /// Shared (read) lock only, so a concurrent `SegmentWriter` holding the
    /// exclusive lock on the live tail segment does not block replay of the
    /// older, already-sealed segments it is reading alongside it.
    pub fn open(path: &Path, seq: u64, start_index: u64) -> Result<Self> {
        let file = File::open(path)?;
        file.try_lock_shared().map_err(|e| {
            NodeError::WalFatal(format!("failed to lock wal segment {}: {e}", path.display()))
        })?;
        Ok(Self { seq, start_index, reader: BufReader::new(file), offset: 0 })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn read_frame_header_position(&mut self) -> Result<u64> {
        let pos = self.reader.stream_position()?;
        self.offset = pos;
        Ok(pos)
    }

    pub fn inner_mut(&mut self) -> &mut BufReader<File> {
        &mut self.reader
    }

    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        self.offset = offset;
        Ok(())
    }
}
