// WAL record framing.
//
// Grounded on `original_source/utils/api/wal/walpb/record.go` and the
// encoder/decoder referenced from `repair.go` (`newDecoder`, `lastOffset`,
// `decoder.crc`): each record is length-prefixed and CRC32C-protected, and
// the running CRC carries across records so a `Crc`-typed record can
// re-anchor the chain after a segment boundary.
//
// On-disk frame: an 8-byte little-endian header packing the payload
// length and a 0-7 byte pad count into one word (`frameSize = (len << 3)
// | pad`), the bincode-encoded `Record`, then `pad` zero bytes so every
// frame ends on an 8-byte boundary. The padding is what lets `Repair`
// truncate a half-written frame without leaving a partial word behind.

use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RecordType {
    Metadata = 0,
    Entry = 1,
    State = 2,
    Crc = 3,
    SnapshotPointer = 4,
}

impl RecordType {
    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => RecordType::Metadata,
            1 => RecordType::Entry,
            2 => RecordType::State,
            3 => RecordType::Crc,
            4 => RecordType::SnapshotPointer,
            other => return Err(NodeError::Wal(format!("unknown record type {other}"))),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub rec_type: RecordType,
    pub crc: u32,
    pub data: Vec<u8>,
}

impl Record {
    pub fn new(rec_type: RecordType, crc: u32, data: Vec<u8>) -> Self {
        Self { rec_type, crc, data }
    }

    /// Encoded form used on the wire: `[type:1][crc:4][data]`. Kept a
    /// manual byte layout (rather than bincode for the whole struct) so
    /// the CRC is always computed over a stable byte range independent
    /// of serde's derive output.
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 4 + self.data.len());
        buf.push(self.rec_type as u8);
        buf.extend_from_slice(&self.crc.to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 5 {
            return Err(NodeError::Wal("record frame too short".to_string()));
        }
        let rec_type = RecordType::from_u8(bytes[0])?;
        let crc = u32::from_le_bytes(bytes[1..5].try_into().unwrap());
        let data = bytes[5..].to_vec();
        Ok(Self { rec_type, crc, data })
    }

    /// CRC32C over the record type and data, chained on top of
    /// `prev_crc` so a reader can detect a record that silently went
    /// missing even though each individual frame is well-formed.
    pub fn compute_crc(rec_type: RecordType, data: &[u8], prev_crc: u32) -> u32 {
        let mut bytes = Vec::with_capacity(1 + data.len());
        bytes.push(rec_type as u8);
        bytes.extend_from_slice(data);
        crc32c::crc32c_append(prev_crc, &bytes)
    }
}

fn padding_for(len: usize) -> usize {
    (8 - (len % 8)) % 8
}

pub fn encode_frame(w: &mut impl Write, rec: &Record) -> Result<()> {
    let body = rec.to_bytes();
    let pad = padding_for(body.len());
    let header = ((body.len() as u64) << 3) | pad as u64;
    w.write_all(&header.to_le_bytes())?;
    w.write_all(&body)?;
    if pad > 0 {
        w.write_all(&[0u8; 8][..pad])?;
    }
    Ok(())
}

pub enum DecodeOutcome {
    Record(Record),
    /// Clean end of file: every byte read was a complete frame.
    Eof,
    /// A frame header or body was cut short by a crash; the caller may
    /// repair by truncating at `valid_offset`.
    UnexpectedEof { valid_offset: u64 },
}

/// Decode exactly one frame, tracking the byte offset the stream was at
/// before this call so callers can truncate there on a partial read.
pub fn decode_frame(r: &mut impl Read, offset_before: u64) -> io::Result<DecodeOutcome> {
    let mut header_buf = [0u8; 8];
    match read_exact_or_eof(r, &mut header_buf)? {
        ReadExact::Eof => return Ok(DecodeOutcome::Eof),
        ReadExact::Partial => return Ok(DecodeOutcome::UnexpectedEof { valid_offset: offset_before }),
        ReadExact::Full => {}
    }
    let header = u64::from_le_bytes(header_buf);
    let len = (header >> 3) as usize;
    let pad = (header & 0x7) as usize;

    let mut body = vec![0u8; len];
    if !matches!(read_exact_or_eof(r, &mut body)?, ReadExact::Full) {
        return Ok(DecodeOutcome::UnexpectedEof { valid_offset: offset_before });
    }
    if pad > 0 {
        let mut padbuf = [0u8; 8];
        if !matches!(read_exact_or_eof(r, &mut padbuf[..pad])?, ReadExact::Full) {
            return Ok(DecodeOutcome::UnexpectedEof { valid_offset: offset_before });
        }
    }

    match Record::from_bytes(&body) {
        Ok(rec) => Ok(DecodeOutcome::Record(rec)),
        Err(_) => Ok(DecodeOutcome::UnexpectedEof { valid_offset: offset_before }),
    }
}

enum ReadExact {
    Full,
    Partial,
    Eof,
}

fn read_exact_or_eof(r: &mut impl Read, buf: &mut [u8]) -> io::Result<ReadExact> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 { ReadExact::Eof } else { ReadExact::Partial });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(ReadExact::Full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_round_trips() {
        let rec = Record::new(RecordType::Entry, 0xdead_beef, b"hello world".to_vec());
        let mut buf = Vec::new();
        encode_frame(&mut buf, &rec).unwrap();
        assert_eq!(buf.len() % 8, 0);

        let mut cur = Cursor::new(buf);
        match decode_frame(&mut cur, 0).unwrap() {
            DecodeOutcome::Record(got) => {
                assert_eq!(got.rec_type as u8, RecordType::Entry as u8);
                assert_eq!(got.crc, 0xdead_beef);
                assert_eq!(got.data, b"hello world");
            }
            _ => panic!("expected a record"),
        }
    }

    #[test]
    fn truncated_frame_reports_unexpected_eof_at_prior_offset() {
        let rec = Record::new(RecordType::Entry, 1, b"0123456789".to_vec());
        let mut buf = Vec::new();
        encode_frame(&mut buf, &rec).unwrap();
        buf.truncate(buf.len() - 3);

        let mut cur = Cursor::new(buf);
        match decode_frame(&mut cur, 42).unwrap() {
            DecodeOutcome::UnexpectedEof { valid_offset } => {
                assert_eq!(valid_offset, 42);
            }
            _ => panic!("expected unexpected eof"),
        }
    }

    #[test]
    fn crc_chains_across_records() {
        let crc1 = Record::compute_crc(RecordType::Entry, b"a", 0);
        let crc2 = Record::compute_crc(RecordType::Entry, b"b", crc1);
        let crc2_independent = Record::compute_crc(RecordType::Entry, b"b", 0);
        assert_ne!(crc2, crc2_independent);
    }
}
