// Repair a WAL segment left mid-write by a crash.
//
// Grounded on `original_source/utils/api/wal/repair.go`: copy the whole
// file to `<name>.broken` first, then truncate the original at the last
// offset a complete record was read up to, and fsync. A corrupt record
// earlier than the final one is not repairable this way and is treated
// as fatal, matching the Go version's "decode error other than
// ErrUnexpectedEOF" branch.

use super::record::{decode_frame, DecodeOutcome};
use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom};
use std::path::Path;

/// Attempt to repair `path` in place. Returns `Ok(true)` if the file was
/// truncated (or found already clean), `Ok(false)` if an earlier record
/// was corrupt and repair was not attempted.
pub fn repair_segment(path: &Path) -> Result<bool> {
    let valid_offset = {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut offset = 0u64;
        loop {
            let before = reader.stream_position()?;
            match decode_frame(&mut reader, before)? {
                DecodeOutcome::Record(_) => {
                    offset = reader.stream_position()?;
                }
                DecodeOutcome::Eof => return Ok(true),
                DecodeOutcome::UnexpectedEof { valid_offset } => break valid_offset,
            }
        }
    };

    let broken_path = path.with_extension("wal.broken");
    std::fs::copy(path, &broken_path)?;
    tracing::warn!(
        path = %path.display(),
        backup = %broken_path.display(),
        valid_offset,
        "repairing wal segment by truncation"
    );

    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(valid_offset)?;
    file.sync_all()?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::record::{encode_frame, Record, RecordType};
    use std::io::Write;

    #[test]
    fn truncates_off_a_half_written_trailing_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0000000000000001-0000000000000001.wal");
        let mut buf = Vec::new();
        encode_frame(&mut buf, &Record::new(RecordType::Entry, 1, b"first".to_vec())).unwrap();
        let good_len = buf.len() as u64;
        encode_frame(&mut buf, &Record::new(RecordType::Entry, 2, b"second".to_vec())).unwrap();
        buf.truncate(buf.len() - 4);
        std::fs::write(&path, &buf).unwrap();

        assert!(repair_segment(&path).unwrap());
        let repaired = std::fs::metadata(&path).unwrap().len();
        assert_eq!(repaired, good_len);
        assert!(path.with_extension("wal.broken").exists());
    }

    #[test]
    fn clean_file_is_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0000000000000001-0000000000000001.wal");
        let mut f = File::create(&path).unwrap();
        let mut buf = Vec::new();
        encode_frame(&mut buf, &Record::new(RecordType::Entry, 1, b"whole".to_vec())).unwrap();
        f.write_all(&buf).unwrap();
        drop(f);

        let len_before = std::fs::metadata(&path).unwrap().len();
        assert!(repair_segment(&path).unwrap());
        let len_after = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len_before, len_after);
    }
}
