// Wire and in-memory types for the consensus core.
//
// These mirror `raftpb` in `original_source` closely enough that the WAL
// and transport encodings line up exactly: `Entry`, `HardState`,
// `ConfState`, `Snapshot`, `ConfChange`, `Message`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Normal,
    ConfChange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub index: u64,
    pub term: u64,
    pub kind: EntryKind,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HardState {
    pub term: u64,
    pub vote: u64,
    pub commit: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfState {
    pub voters: Vec<u64>,
}

impl ConfState {
    pub fn contains(&self, id: u64) -> bool {
        self.voters.contains(&id)
    }

    pub fn add(&mut self, id: u64) {
        if !self.voters.contains(&id) {
            self.voters.push(id);
        }
    }

    pub fn remove(&mut self, id: u64) {
        self.voters.retain(|v| *v != id);
    }

    pub fn quorum(&self) -> usize {
        self.voters.len() / 2 + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub index: u64,
    pub term: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub conf_state: ConfState,
    pub data: Vec<u8>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.metadata.index == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfChangeType {
    AddNode,
    RemoveNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfChange {
    pub id: u64,
    pub change_type: ConfChangeType,
    pub node_id: u64,
    /// Advertised peer URL for `AddNode`; empty for `RemoveNode`.
    pub context: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Vote,
    VoteResponse,
    Append,
    AppendResponse,
    Heartbeat,
    HeartbeatResponse,
    Snapshot,
    /// Zero-length frame used only to keep a transport stream warm; never
    /// reaches `RaftCore::step`.
    LinkHeartbeat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub from: u64,
    pub to: u64,
    pub term: u64,
    pub msg_type: MessageType,
    /// Term of the entry immediately preceding `entries` (AppendEntries'
    /// `prevLogTerm`), or the candidate's last log term for votes.
    pub log_term: u64,
    /// Index of the entry immediately preceding `entries`, or the
    /// candidate's last log index for votes, or the acked index for
    /// responses.
    pub index: u64,
    pub entries: Vec<Entry>,
    pub commit: u64,
    pub reject: bool,
    pub reject_hint: u64,
    pub snapshot: Option<Snapshot>,
}

impl Message {
    pub fn new(msg_type: MessageType, from: u64, to: u64, term: u64) -> Self {
        Self {
            from,
            to,
            term,
            msg_type,
            log_term: 0,
            index: 0,
            entries: Vec::new(),
            commit: 0,
            reject: false,
            reject_hint: 0,
            snapshot: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftState {
    /// 0 means no known leader.
    pub leader_id: u64,
    pub is_leader: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStatus {
    Finish,
    Failure,
}

/// One batch of consensus output, handed to the driver's readiness loop
/// for persistence, transport, and application, in that order.
#[derive(Debug, Clone, Default)]
pub struct Ready {
    pub soft_state: Option<SoftState>,
    pub hard_state: Option<HardState>,
    pub entries: Vec<Entry>,
    pub snapshot: Option<Snapshot>,
    pub messages: Vec<Message>,
    pub committed_entries: Vec<Entry>,
}

impl Ready {
    pub fn is_empty(&self) -> bool {
        self.soft_state.is_none()
            && self.hard_state.is_none()
            && self.entries.is_empty()
            && self.snapshot.is_none()
            && self.messages.is_empty()
            && self.committed_entries.is_empty()
    }
}
