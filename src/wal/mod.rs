//! Crash-safe write-ahead log.
//!
//! Grounded on `original_source/utils/api/wal/*`: entries, the hard state,
//! and a pointer to the most recent snapshot are appended as length-
//! framed, CRC32C-chained records (`record.rs`) across a sequence of
//! segment files (`segment.rs`), with a background pipeline keeping a
//! preallocated next segment ready (`pipeline.rs`) and a repair pass that
//! truncates a half-written tail record left by a crash (`repair.rs`).

mod pipeline;
mod record;
mod repair;
mod segment;

use crate::consensus::{ConfState, Entry, HardState, SnapshotMetadata};
use crate::error::{NodeError, Result};
use pipeline::FilePipeline;
use record::{decode_frame, encode_frame, DecodeOutcome, Record, RecordType};
use segment::{list_segments, SegmentReader, SegmentWriter};
use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};

const BINCODE_CONFIG: bincode::config::Configuration = bincode::config::standard();

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, BINCODE_CONFIG).map_err(|e| NodeError::Encode(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::serde::decode_from_slice(bytes, BINCODE_CONFIG)
        .map(|(v, _)| v)
        .map_err(|e| NodeError::Decode(e.to_string()))
}

/// Metadata embedded in every WAL directory: identifies which cluster and
/// node this log belongs to, so a node accidentally pointed at the wrong
/// data directory fails fast instead of replaying someone else's log.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WalMetadata {
    pub cluster_id: u64,
    pub node_id: u64,
}

/// Everything recovered by replaying an existing WAL directory.
pub struct Replayed {
    pub metadata: WalMetadata,
    pub hard_state: HardState,
    pub conf_state: ConfState,
    pub snapshot_pointer: Option<SnapshotMetadata>,
    pub entries: Vec<Entry>,
}

pub struct Wal {
    dir: PathBuf,
    segment_size: u64,
    writer: SegmentWriter,
    pipeline: FilePipeline,
    crc: u32,
    next_seq: u64,
}

impl Wal {
    /// Create a brand new WAL directory with an initial segment holding
    /// just the metadata record. Fails if the directory already has WAL
    /// segments, to avoid silently clobbering an existing log.
    pub fn create(dir: &Path, segment_size: u64, metadata: &WalMetadata) -> Result<Self> {
        if !list_segments(dir)?.is_empty() {
            return Err(NodeError::Wal(format!(
                "refusing to create wal: {} already has segments",
                dir.display()
            )));
        }
        std::fs::create_dir_all(dir)?;

        let tmp_path = dir.join("0000000000000000-0000000000000000.wal.tmp");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        fs2::FileExt::allocate(&file, segment_size)
            .map_err(|e| NodeError::Wal(format!("preallocate: {e}")))?;

        let mut writer = SegmentWriter::create(dir, 0, 0, file)?;
        let mut crc = 0u32;
        write_record(&mut writer, &mut crc, RecordType::Metadata, encode(metadata)?)?;
        writer.flush_and_sync()?;
        drop(writer);

        std::fs::rename(&tmp_path, dir.join(segment::segment_name(0, 0)))?;
        let writer = SegmentWriter::open_append(dir, 0, 0)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            segment_size,
            writer,
            pipeline: FilePipeline::new(dir.to_path_buf(), segment_size),
            crc,
            next_seq: 1,
        })
    }

    /// Open and replay an existing WAL directory, repairing a truncated
    /// tail record first if one is found. `snapshot_index` is the index of
    /// the snapshot the caller has already loaded (0 if none); entries at
    /// or below it are routinely still physically present (a whole
    /// segment is only dropped once every entry in it is covered) and are
    /// dropped here rather than handed back, since the state machine
    /// already has them via the snapshot and the in-memory log is only
    /// ever supposed to start at `snapshot_index + 1`.
    pub fn open(dir: &Path, segment_size: u64, snapshot_index: u64) -> Result<(Self, Replayed)> {
        let segments = list_segments(dir)?;
        if segments.is_empty() {
            return Err(NodeError::Wal(format!("no wal segments in {}", dir.display())));
        }

        let mut metadata: Option<WalMetadata> = None;
        let mut hard_state = HardState::default();
        let mut conf_state = ConfState::default();
        let mut snapshot_pointer = None;
        let mut entries: Vec<Entry> = Vec::new();
        let mut crc = 0u32;

        let last_seq = segments.last().unwrap().0;
        for (seq, start_index, path) in &segments {
            let is_last = *seq == last_seq;
            let mut reader = SegmentReader::open(path, *seq, *start_index)?;
            loop {
                let before = reader.read_frame_header_position()?;
                match decode_frame(reader.inner_mut(), before)? {
                    DecodeOutcome::Eof => break,
                    DecodeOutcome::UnexpectedEof { .. } => {
                        if !is_last {
                            return Err(NodeError::WalFatal(format!(
                                "truncated record in non-final segment {}",
                                path.display()
                            )));
                        }
                        drop(reader);
                        repair::repair_segment(path)?;
                        break;
                    }
                    DecodeOutcome::Record(rec) => {
                        apply_replayed_record(
                            rec,
                            &mut crc,
                            &mut metadata,
                            &mut hard_state,
                            &mut conf_state,
                            &mut snapshot_pointer,
                            &mut entries,
                            snapshot_index,
                        )?;
                    }
                }
            }
        }

        let metadata = metadata
            .ok_or_else(|| NodeError::WalFatal("wal has no metadata record".to_string()))?;

        let (last_seq, last_start) = (segments.last().unwrap().0, segments.last().unwrap().1);
        let writer = SegmentWriter::open_append(dir, last_seq, last_start)?;

        let wal = Self {
            dir: dir.to_path_buf(),
            segment_size,
            writer,
            pipeline: FilePipeline::new(dir.to_path_buf(), segment_size),
            crc,
            next_seq: last_seq + 1,
        };

        Ok((
            wal,
            Replayed { metadata, hard_state, conf_state, snapshot_pointer, entries },
        ))
    }

    pub fn save_entries(&mut self, entries: &[Entry]) -> Result<()> {
        if let Some(first) = entries.first() {
            self.rotate_if_needed(first.index, entries)?;
        }
        for e in entries {
            write_record(&mut self.writer, &mut self.crc, RecordType::Entry, encode(e)?)?;
        }
        Ok(())
    }

    pub fn save_hard_state(&mut self, hs: &HardState) -> Result<()> {
        write_record(&mut self.writer, &mut self.crc, RecordType::State, encode(hs)?)
    }

    /// Writes never span segments: if this batch of entries would push the
    /// current segment past its target size, cut to a fresh preallocated
    /// one first so the whole batch lands in one file.
    fn rotate_if_needed(&mut self, next_start_index: u64, entries: &[Entry]) -> Result<()> {
        let mut estimated = 0u64;
        for e in entries {
            estimated += encode(e)?.len() as u64 + 16;
        }
        if self.writer.len() + estimated > self.segment_size {
            self.cut(next_start_index)?;
        }
        Ok(())
    }

    pub fn save_snapshot_pointer(&mut self, meta: &SnapshotMetadata) -> Result<()> {
        write_record(&mut self.writer, &mut self.crc, RecordType::SnapshotPointer, encode(meta)?)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush_and_sync()
    }

    /// Roll over to a new segment starting at `next_start_index`, using a
    /// file the background pipeline has already preallocated.
    pub fn cut(&mut self, next_start_index: u64) -> Result<()> {
        self.sync()?;
        let (tmp_path, mut file) = self.pipeline.open()?;
        let final_path = self.dir.join(segment::segment_name(self.next_seq, next_start_index));
        // Re-anchor the CRC chain at the top of the new segment so a
        // reader starting here doesn't need the previous segment's tail.
        let mut writer = SegmentWriter::create(&self.dir, self.next_seq, next_start_index, {
            file.flush().ok();
            file
        })?;
        write_record(&mut writer, &mut self.crc, RecordType::Crc, Vec::new())?;
        writer.flush_and_sync()?;
        drop(writer);
        std::fs::rename(&tmp_path, &final_path)?;
        self.writer = SegmentWriter::open_append(&self.dir, self.next_seq, next_start_index)?;
        self.next_seq += 1;
        Ok(())
    }

    /// Delete segments that end strictly before `keep_from_index`,
    /// bounding retention to `max_segments` most recent files even if
    /// more than that still precede the retained index.
    pub fn purge(&self, keep_from_index: u64, max_segments: usize) -> Result<Vec<PathBuf>> {
        let mut segments = list_segments(&self.dir)?;
        if segments.len() <= 1 {
            return Ok(Vec::new());
        }
        segments.pop(); // never remove the active segment
        let mut removable: Vec<PathBuf> = Vec::new();
        for window in segments.windows(2) {
            let next_start = window[1].1;
            if next_start <= keep_from_index {
                removable.push(window[0].2.clone());
            }
        }
        if removable.len() > max_segments {
            let overflow = removable.len() - max_segments;
            removable.drain(0..overflow);
        } else if removable.len() <= max_segments {
            // Keep everything; retention cap not yet exceeded.
        }
        for path in &removable {
            std::fs::remove_file(path)?;
        }
        Ok(removable)
    }
}

fn write_record(
    writer: &mut SegmentWriter,
    crc: &mut u32,
    rec_type: RecordType,
    data: Vec<u8>,
) -> Result<()> {
    // A `Crc` record just re-publishes the running value as an anchor for
    // readers starting at this segment; it does not fold its own type
    // byte into the hash the way a data-carrying record does.
    let new_crc = match rec_type {
        RecordType::Crc => *crc,
        _ => Record::compute_crc(rec_type, &data, *crc),
    };
    let rec = Record::new(rec_type, new_crc, data);
    let mut frame = Vec::new();
    encode_frame(&mut frame, &rec)?;
    writer.write_frame(&frame)?;
    *crc = new_crc;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn apply_replayed_record(
    rec: Record,
    crc: &mut u32,
    metadata: &mut Option<WalMetadata>,
    hard_state: &mut HardState,
    conf_state: &mut ConfState,
    snapshot_pointer: &mut Option<SnapshotMetadata>,
    entries: &mut Vec<Entry>,
    snapshot_index: u64,
) -> Result<()> {
    use self::record::RecordType::*;
    match rec.rec_type {
        Crc => {
            if *crc != 0 && rec.crc != *crc {
                return Err(NodeError::CrcMismatch { expected: *crc, actual: rec.crc });
            }
            *crc = rec.crc;
        }
        Metadata => {
            *metadata = Some(decode(&rec.data)?);
            let expect = Record::compute_crc(Metadata, &rec.data, 0);
            check_crc(rec.crc, expect, crc)?;
        }
        Entry => {
            let expect = Record::compute_crc(self::record::RecordType::Entry, &rec.data, *crc);
            check_crc(rec.crc, expect, crc)?;
            let entry: Entry = decode(&rec.data)?;
            // Routinely present: a segment is only purged once every entry
            // in it is covered by a snapshot, so the segment straddling
            // the snapshot boundary still has entries at or below it.
            if entry.index > snapshot_index {
                entries.push(entry);
            }
        }
        State => {
            let expect = Record::compute_crc(State, &rec.data, *crc);
            check_crc(rec.crc, expect, crc)?;
            let hs: HardState = decode(&rec.data)?;
            *hard_state = hs;
        }
        SnapshotPointer => {
            let expect = Record::compute_crc(SnapshotPointer, &rec.data, *crc);
            check_crc(rec.crc, expect, crc)?;
            *snapshot_pointer = Some(decode(&rec.data)?);
        }
    }
    let _ = conf_state; // conf state is carried in snapshots, not the WAL itself
    Ok(())
}

fn check_crc(got: u32, expect: u32, running: &mut u32) -> Result<()> {
    if got != expect {
        return Err(NodeError::CrcMismatch { expected: expect, actual: got });
    }
    *running = got;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::EntryKind;

    fn entry(index: u64, term: u64) -> Entry {
        Entry { index, term, kind: EntryKind::Normal, data: vec![1, 2, 3] }
    }

    #[test]
    fn create_then_open_replays_metadata_and_entries() {
        let dir = tempfile::tempdir().unwrap();
        let meta = WalMetadata { cluster_id: 7, node_id: 1 };
        {
            let mut wal = Wal::create(dir.path(), 1024 * 1024, &meta).unwrap();
            wal.save_entries(&[entry(1, 1), entry(2, 1)]).unwrap();
            wal.save_hard_state(&HardState { term: 1, vote: 1, commit: 2 }).unwrap();
            wal.sync().unwrap();
        }

        let (_wal, replayed) = Wal::open(dir.path(), 1024 * 1024, 0).unwrap();
        assert_eq!(replayed.metadata.cluster_id, 7);
        assert_eq!(replayed.entries.len(), 2);
        assert_eq!(replayed.hard_state.commit, 2);
    }

    #[test]
    fn cut_rolls_to_a_new_segment_with_reanchored_crc() {
        let dir = tempfile::tempdir().unwrap();
        let meta = WalMetadata { cluster_id: 1, node_id: 1 };
        let mut wal = Wal::create(dir.path(), 1024 * 1024, &meta).unwrap();
        wal.save_entries(&[entry(1, 1)]).unwrap();
        wal.cut(2).unwrap();
        wal.save_entries(&[entry(2, 1)]).unwrap();
        wal.sync().unwrap();
        drop(wal);

        let segments = segment::list_segments(dir.path()).unwrap();
        assert_eq!(segments.len(), 2);

        let (_wal, replayed) = Wal::open(dir.path(), 1024 * 1024, 0).unwrap();
        assert_eq!(replayed.entries.len(), 2);
    }
}
