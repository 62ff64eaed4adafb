// In-memory log storage backing `RaftCore`.
//
// Grounded on `networking::membership::raft::log::RaftLog`:
// a `VecDeque<Entry>` plus a compaction boundary, addressed by absolute
// log index rather than slice offset. The durable copy of this state
// lives in the WAL and snapshot modules; `MemoryStorage` is the core's
// working set, rebuilt from those on restart.

use super::types::{ConfState, Entry, HardState, Snapshot};
use std::collections::VecDeque;

#[derive(Debug)]
pub struct MemoryStorage {
    hard_state: HardState,
    conf_state: ConfState,
    snapshot: Snapshot,
    /// Entries with index > snapshot.metadata.index, contiguous from
    /// `snapshot.metadata.index + 1`.
    entries: VecDeque<Entry>,
}

impl MemoryStorage {
    pub fn new(conf_state: ConfState) -> Self {
        Self {
            hard_state: HardState::default(),
            conf_state,
            snapshot: Snapshot::default(),
            entries: VecDeque::new(),
        }
    }

    pub fn hard_state(&self) -> HardState {
        self.hard_state
    }

    pub fn set_hard_state(&mut self, hs: HardState) {
        self.hard_state = hs;
    }

    pub fn conf_state(&self) -> &ConfState {
        &self.conf_state
    }

    pub fn set_conf_state(&mut self, cs: ConfState) {
        self.conf_state = cs;
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Index of the last entry in the compacted-away prefix (0 if none).
    pub fn compacted_index(&self) -> u64 {
        self.snapshot.metadata.index
    }

    pub fn compacted_term(&self) -> u64 {
        self.snapshot.metadata.term
    }

    pub fn first_index(&self) -> u64 {
        self.compacted_index() + 1
    }

    pub fn last_index(&self) -> u64 {
        self.compacted_index() + self.entries.len() as u64
    }

    pub fn last_term(&self) -> u64 {
        match self.entries.back() {
            Some(e) => e.term,
            None => self.compacted_term(),
        }
    }

    pub fn term_at(&self, index: u64) -> Option<u64> {
        if index == self.compacted_index() {
            return Some(self.compacted_term());
        }
        if index < self.first_index() || index > self.last_index() {
            return None;
        }
        self.entries
            .get((index - self.first_index()) as usize)
            .map(|e| e.term)
    }

    pub fn entry_at(&self, index: u64) -> Option<&Entry> {
        if index < self.first_index() || index > self.last_index() {
            return None;
        }
        self.entries.get((index - self.first_index()) as usize)
    }

    /// Entries in `[lo, hi)`, clamped to what is retained.
    pub fn slice(&self, lo: u64, hi: u64) -> Vec<Entry> {
        if hi <= lo {
            return Vec::new();
        }
        let lo = lo.max(self.first_index());
        let hi = hi.min(self.last_index() + 1);
        if hi <= lo {
            return Vec::new();
        }
        let start = (lo - self.first_index()) as usize;
        let end = (hi - self.first_index()) as usize;
        self.entries.iter().skip(start).take(end - start).cloned().collect()
    }

    /// Append entries, truncating any conflicting suffix first (Raft log
    /// matching property: later entries at the same index from a new
    /// leader replace whatever was there).
    pub fn append(&mut self, entries: &[Entry]) {
        let Some(first) = entries.first() else { return };
        if first.index > self.last_index() + 1 {
            panic!(
                "missing log entries: first new index {} > last_index {} + 1",
                first.index,
                self.last_index()
            );
        }
        if first.index <= self.last_index() {
            let keep = (first.index - self.first_index()) as usize;
            self.entries.truncate(keep);
        }
        for e in entries {
            self.entries.push_back(e.clone());
        }
    }

    /// Discard everything up to and including `index`, recording it as
    /// the new compaction boundary. `index` must name a retained entry
    /// (or be exactly the current compaction boundary, a no-op).
    pub fn compact(&mut self, index: u64, term: u64) {
        if index <= self.compacted_index() {
            return;
        }
        let drop_count = (index - self.first_index() + 1).min(self.entries.len() as u64);
        for _ in 0..drop_count {
            self.entries.pop_front();
        }
        self.snapshot.metadata.index = index;
        self.snapshot.metadata.term = term;
    }

    /// Install a snapshot, discarding the entire in-memory log (used on
    /// InstallSnapshot from the leader or on restart-from-snapshot).
    pub fn apply_snapshot(&mut self, snap: Snapshot) {
        self.entries.clear();
        self.conf_state = snap.conf_state.clone();
        self.snapshot = snap;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::types::EntryKind;

    fn entry(index: u64, term: u64) -> Entry {
        Entry { index, term, kind: EntryKind::Normal, data: vec![] }
    }

    #[test]
    fn append_and_read_back() {
        let mut s = MemoryStorage::new(ConfState::default());
        s.append(&[entry(1, 1), entry(2, 1), entry(3, 2)]);
        assert_eq!(s.last_index(), 3);
        assert_eq!(s.last_term(), 2);
        assert_eq!(s.term_at(2), Some(1));
        assert_eq!(s.slice(1, 4).len(), 3);
    }

    #[test]
    fn append_truncates_conflicting_suffix() {
        let mut s = MemoryStorage::new(ConfState::default());
        s.append(&[entry(1, 1), entry(2, 1), entry(3, 1)]);
        s.append(&[entry(2, 2)]);
        assert_eq!(s.last_index(), 2);
        assert_eq!(s.term_at(2), Some(2));
    }

    #[test]
    fn compact_moves_first_index_and_drops_entries() {
        let mut s = MemoryStorage::new(ConfState::default());
        s.append(&[entry(1, 1), entry(2, 1), entry(3, 2)]);
        s.compact(2, 1);
        assert_eq!(s.first_index(), 3);
        assert_eq!(s.term_at(2), Some(1));
        assert_eq!(s.entry_at(2), None);
        assert_eq!(s.slice(1, 4), vec![entry(3, 2)]);
    }
}
