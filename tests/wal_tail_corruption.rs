// A crash that leaves a half-written trailing record in the active WAL
// segment must be repaired by truncation on the next open, recovering
// every entry up to the truncation point.

use raft_node::consensus::{Entry, EntryKind, HardState};
use raft_node::wal::{Wal, WalMetadata};
use std::io::{Seek, SeekFrom, Write};

#[test]
fn truncated_trailing_entry_is_repaired_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let meta = WalMetadata { cluster_id: 7, node_id: 1 };

    {
        let mut wal = Wal::create(dir.path(), 1024 * 1024, &meta).unwrap();
        wal.save_entries(&[
            Entry { index: 1, term: 1, kind: EntryKind::Normal, data: b"one".to_vec() },
            Entry { index: 2, term: 1, kind: EntryKind::Normal, data: b"two".to_vec() },
        ])
        .unwrap();
        wal.save_hard_state(&HardState { term: 1, vote: 1, commit: 2 }).unwrap();
        wal.sync().unwrap();
    }

    // Simulate a crash mid-write: chop a few bytes off the tail of
    // whichever file is the newest segment.
    let segment_path = newest_segment(dir.path());
    let len_before = std::fs::metadata(&segment_path).unwrap().len();
    let f = std::fs::OpenOptions::new().write(true).open(&segment_path).unwrap();
    f.set_len(len_before - 3).unwrap();
    drop(f);
    let mut f = std::fs::OpenOptions::new().write(true).open(&segment_path).unwrap();
    f.seek(SeekFrom::End(0)).unwrap();
    f.flush().unwrap();

    let (_wal, replayed) = Wal::open(dir.path(), 1024 * 1024, 0).unwrap();
    assert_eq!(replayed.metadata.cluster_id, 7);
    // At minimum the first entry, written before the corrupted tail,
    // must have survived.
    assert!(replayed.entries.iter().any(|e| e.index == 1 && e.data == b"one"));
    assert!(segment_path.with_extension("wal.broken").exists());
}

fn newest_segment(dir: &std::path::Path) -> std::path::PathBuf {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("wal"))
        .collect();
    files.sort();
    files.pop().expect("at least one wal segment")
}
