// Single-threaded Raft core.
//
// Grounded on `networking::membership::raft::{mod,election,replication}`
// (`RaftStateData`, `RaftRole`, `ElectionManager`, `ReplicationManager`)
// but reshaped from that actor-style, async, `Arc<RwLock<_>>`-guarded
// design into a plain synchronous state machine that the driver owns
// exclusively and drives with `tick`/`step`/`propose`, draining `ready()`
// and calling `advance()` once the caller has persisted and transported
// the batch. This Ready/Advance split has no counterpart in the actor
// model above; it follows `original_source/node/raft.go`'s
// `serveChannels` loop instead.

use super::storage::MemoryStorage;
use super::types::{
    ConfChange, ConfChangeType, ConfState, Entry, EntryKind, HardState, Message, MessageType,
    Ready, Role, Snapshot, SnapshotMetadata, SnapshotStatus, SoftState,
};
use crate::error::{NodeError, Result};
use rand::Rng;
use std::collections::HashMap;

pub struct RaftCore {
    pub id: u64,

    role: Role,
    term: u64,
    vote: u64,
    leader_id: u64,

    storage: MemoryStorage,
    commit_index: u64,

    election_tick: u64,
    heartbeat_tick: u64,
    election_elapsed: u64,
    heartbeat_elapsed: u64,
    randomized_election_timeout: u64,

    votes: HashMap<u64, bool>,
    /// Leader-only: next log index to send each peer.
    next_index: HashMap<u64, u64>,
    /// Leader-only: highest index known replicated to each peer.
    match_index: HashMap<u64, u64>,

    msgs: Vec<Message>,
    /// A snapshot this node just installed (via `handle_snapshot`) that the
    /// driver has not yet persisted/published through a `ready()` batch.
    pending_snapshot: Option<Snapshot>,
    prev_soft_state: SoftState,
    prev_hard_state: HardState,
    /// Highest log index already handed to the driver in a previous
    /// `ready()` batch (and thus assumed to be durable once `advance`
    /// confirms it).
    last_advanced_index: u64,
    /// Highest committed index already handed to the driver as part of
    /// `committed_entries` in a previous `ready()` batch.
    last_applied: u64,
    /// Total size in bytes of entries past `commit_index`; new proposals
    /// are rejected once this would exceed `max_uncommitted_size`, so a
    /// leader cut off from a quorum can't grow its log without bound.
    uncommitted_size: u64,
    max_uncommitted_size: u64,
    /// Caps how many bytes of entries a single Append message carries, so
    /// catching up a far-behind follower doesn't build one unbounded
    /// request; the rest follow once this batch is acked.
    max_size_per_msg: u64,
}

impl RaftCore {
    fn new(
        id: u64,
        conf_state: ConfState,
        hard_state: HardState,
        election_tick: u64,
        heartbeat_tick: u64,
    ) -> Self {
        let mut core = Self {
            id,
            role: Role::Follower,
            term: hard_state.term,
            vote: hard_state.vote,
            leader_id: 0,
            storage: MemoryStorage::new(conf_state),
            commit_index: hard_state.commit,
            election_tick,
            heartbeat_tick,
            election_elapsed: 0,
            heartbeat_elapsed: 0,
            randomized_election_timeout: election_tick,
            votes: HashMap::new(),
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            msgs: Vec::new(),
            pending_snapshot: None,
            prev_soft_state: SoftState { leader_id: 0, is_leader: false },
            prev_hard_state: HardState::default(),
            last_advanced_index: 0,
            last_applied: 0,
            uncommitted_size: 0,
            max_uncommitted_size: u64::MAX,
            max_size_per_msg: u64::MAX,
        };
        core.reset_randomized_election_timeout();
        core
    }

    /// Cap on the total size of log entries past `commit_index`. Defaults
    /// to unlimited; the driver sets this from configuration at startup.
    pub fn set_max_uncommitted_size(&mut self, max: u64) {
        self.max_uncommitted_size = max;
    }

    /// Cap on the total size of entries batched into one Append message.
    /// Defaults to unlimited; the driver sets this from configuration at
    /// startup.
    pub fn set_max_size_per_msg(&mut self, max: u64) {
        self.max_size_per_msg = max;
    }

    /// Bootstrap a brand new cluster out of its full initial voter set.
    /// A lone voter immediately becomes leader of its one-node group;
    /// with more than one initial voter every node starts as a follower
    /// among them and an ordinary election (driven by `tick`) picks the
    /// first leader, so no node assumes leadership it has not won a
    /// quorum for. Nodes that are not part of the initial set join later
    /// via `propose_conf_change`.
    pub fn new_starting(id: u64, initial_voters: Vec<u64>, election_tick: u64, heartbeat_tick: u64) -> Self {
        let mut cs = ConfState::default();
        for voter in initial_voters {
            cs.add(voter);
        }
        cs.add(id);
        let solo = cs.voters == vec![id];
        let mut core = Self::new(id, cs, HardState::default(), election_tick, heartbeat_tick);
        if solo {
            core.become_leader();
        }
        core
    }

    /// Join an existing, already-running cluster: start as a follower
    /// with no voters configured locally; the leader's first AppendEntries
    /// or snapshot carries the real configuration.
    pub fn new_joining(id: u64, election_tick: u64, heartbeat_tick: u64) -> Self {
        Self::new(id, ConfState::default(), HardState::default(), election_tick, heartbeat_tick)
    }

    /// Rebuild after a restart from durable state: the hard state and
    /// configuration recovered from the WAL/snapshot, plus the tail of
    /// the log that survived replay.
    pub fn restart(
        id: u64,
        conf_state: ConfState,
        hard_state: HardState,
        snapshot_metadata: SnapshotMetadata,
        entries: Vec<Entry>,
        election_tick: u64,
        heartbeat_tick: u64,
    ) -> Self {
        let mut core = Self::new(id, conf_state, hard_state, election_tick, heartbeat_tick);
        if snapshot_metadata.index > 0 {
            core.storage.compact(snapshot_metadata.index, snapshot_metadata.term);
        }
        if !entries.is_empty() {
            core.storage.append(&entries);
        }
        core.prev_hard_state = hard_state;
        // Everything up to here was already durable before the restart
        // (it came from the WAL/snapshot the driver just replayed), so it
        // must not be re-emitted through `ready()`.
        core.last_advanced_index = core.storage.last_index();
        core.last_applied = hard_state.commit;
        core
    }

    fn reset_randomized_election_timeout(&mut self) {
        self.randomized_election_timeout =
            self.election_tick + rand::rng().random_range(0..self.election_tick);
    }

    fn quorum(&self) -> usize {
        self.storage.conf_state().quorum()
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn leader_id(&self) -> u64 {
        self.leader_id
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    // ---- role transitions -------------------------------------------------

    fn become_follower(&mut self, term: u64, leader_id: u64) {
        self.role = Role::Follower;
        self.term = term;
        self.vote = 0;
        self.leader_id = leader_id;
        self.election_elapsed = 0;
        self.reset_randomized_election_timeout();
        // Any unacked proposals from a prior leadership term are someone
        // else's problem now (replayed by the client, or already
        // superseded by the new leader's log).
        self.uncommitted_size = 0;
    }

    fn become_candidate(&mut self) {
        self.role = Role::Candidate;
        self.term += 1;
        self.vote = self.id;
        self.leader_id = 0;
        self.votes.clear();
        self.votes.insert(self.id, true);
        self.election_elapsed = 0;
        self.reset_randomized_election_timeout();
    }

    fn become_leader(&mut self) {
        self.role = Role::Leader;
        self.leader_id = self.id;
        self.heartbeat_elapsed = 0;
        let next = self.storage.last_index() + 1;
        self.next_index.clear();
        self.match_index.clear();
        for voter in self.storage.conf_state().voters.clone() {
            self.next_index.insert(voter, next);
            self.match_index.insert(voter, 0);
        }
        self.match_index.insert(self.id, self.storage.last_index());
        // No-op entry so the new leader can commit entries from prior terms
        // once it is itself replicated (Raft §5.4.2).
        let noop = Entry {
            index: next,
            term: self.term,
            kind: EntryKind::Normal,
            data: Vec::new(),
        };
        self.storage.append(std::slice::from_ref(&noop));
        self.match_index.insert(self.id, self.storage.last_index());
        self.maybe_advance_commit();
    }

    fn campaign(&mut self) {
        self.become_candidate();
        let voters = self.storage.conf_state().voters.clone();
        if voters.len() == 1 && voters[0] == self.id {
            self.become_leader();
            return;
        }
        let last_index = self.storage.last_index();
        let last_term = self.storage.last_term();
        for voter in voters {
            if voter == self.id {
                continue;
            }
            let mut m = Message::new(MessageType::Vote, self.id, voter, self.term);
            m.index = last_index;
            m.log_term = last_term;
            self.msgs.push(m);
        }
    }

    // ---- driving the core --------------------------------------------------

    /// Advance the logical clock by one tick.
    pub fn tick(&mut self) {
        match self.role {
            Role::Leader => {
                self.heartbeat_elapsed += 1;
                if self.heartbeat_elapsed >= self.heartbeat_tick {
                    self.heartbeat_elapsed = 0;
                    self.broadcast_heartbeat();
                }
            }
            Role::Follower | Role::Candidate => {
                self.election_elapsed += 1;
                if self.election_elapsed >= self.randomized_election_timeout {
                    self.election_elapsed = 0;
                    self.campaign();
                }
            }
        }
    }

    fn broadcast_heartbeat(&mut self) {
        let commit = self.commit_index;
        let term = self.term;
        for voter in self.storage.conf_state().voters.clone() {
            if voter == self.id {
                continue;
            }
            let mut m = Message::new(MessageType::Heartbeat, self.id, voter, term);
            m.commit = commit;
            self.msgs.push(m);
        }
    }

    /// Propose a new command to be replicated. Only valid on the leader.
    /// Rejected once too much log data is already waiting on a quorum
    /// ack, so a leader partitioned from its followers can't grow its
    /// log without bound while it waits to be caught up or deposed.
    pub fn propose(&mut self, data: Vec<u8>) -> Result<u64> {
        if !self.is_leader() {
            return Err(NodeError::NotLeader(self.leader_id));
        }
        if self.uncommitted_size.saturating_add(data.len() as u64) > self.max_uncommitted_size {
            return Err(NodeError::ProposalQueueFull);
        }
        let index = self.storage.last_index() + 1;
        self.uncommitted_size += data.len() as u64;
        let entry = Entry { index, term: self.term, kind: EntryKind::Normal, data };
        self.storage.append(std::slice::from_ref(&entry));
        self.match_index.insert(self.id, index);
        self.replicate_to_all();
        self.maybe_advance_commit();
        Ok(index)
    }

    pub fn propose_conf_change(&mut self, cc: ConfChange) -> Result<u64> {
        let data = serde_json::to_vec(&cc).map_err(|e| NodeError::Encode(e.to_string()))?;
        if !self.is_leader() {
            return Err(NodeError::NotLeader(self.leader_id));
        }
        let index = self.storage.last_index() + 1;
        self.uncommitted_size += data.len() as u64;
        let entry = Entry { index, term: self.term, kind: EntryKind::ConfChange, data };
        self.storage.append(std::slice::from_ref(&entry));
        self.match_index.insert(self.id, index);
        self.replicate_to_all();
        self.maybe_advance_commit();
        Ok(index)
    }

    /// Apply a committed conf-change entry to the voter set and, for
    /// `AddNode`, seed the new peer's replication progress. Called by the
    /// driver once the entry has been observed in `committed_entries`.
    pub fn apply_conf_change(&mut self, cc: &ConfChange) {
        match cc.change_type {
            ConfChangeType::AddNode => {
                let mut cs = self.storage.conf_state().clone();
                cs.add(cc.node_id);
                self.storage.set_conf_state(cs);
                if self.is_leader() {
                    self.next_index.insert(cc.node_id, self.storage.last_index() + 1);
                    self.match_index.insert(cc.node_id, 0);
                }
            }
            ConfChangeType::RemoveNode => {
                let mut cs = self.storage.conf_state().clone();
                cs.remove(cc.node_id);
                self.storage.set_conf_state(cs);
                self.next_index.remove(&cc.node_id);
                self.match_index.remove(&cc.node_id);
                if cc.node_id == self.id {
                    self.role = Role::Follower;
                }
            }
        }
    }

    fn replicate_to_all(&mut self) {
        let voters = self.storage.conf_state().voters.clone();
        for voter in voters {
            if voter != self.id {
                self.send_append(voter);
            }
        }
    }

    fn send_append(&mut self, to: u64) {
        let next = *self.next_index.get(&to).unwrap_or(&(self.storage.last_index() + 1));
        if next <= self.storage.compacted_index() {
            self.send_snapshot(to);
            return;
        }
        let prev_index = next - 1;
        let Some(prev_term) = self.storage.term_at(prev_index) else {
            self.send_snapshot(to);
            return;
        };
        let mut m = Message::new(MessageType::Append, self.id, to, self.term);
        m.index = prev_index;
        m.log_term = prev_term;
        m.commit = self.commit_index;
        m.entries = self.bounded_slice(next, self.storage.last_index() + 1);
        self.msgs.push(m);
    }

    /// `storage.slice(lo, hi)` truncated to at most `max_size_per_msg`
    /// bytes of entry data, but always including at least the first
    /// entry so a single oversized entry still makes progress.
    fn bounded_slice(&self, lo: u64, hi: u64) -> Vec<Entry> {
        let mut entries = self.storage.slice(lo, hi);
        let mut total = 0u64;
        let mut cut = entries.len();
        for (i, e) in entries.iter().enumerate() {
            total += e.data.len() as u64;
            if i > 0 && total > self.max_size_per_msg {
                cut = i;
                break;
            }
        }
        entries.truncate(cut);
        entries
    }

    fn send_snapshot(&mut self, to: u64) {
        let mut m = Message::new(MessageType::Snapshot, self.id, to, self.term);
        m.snapshot = Some(self.storage.snapshot().clone());
        self.msgs.push(m);
    }

    fn maybe_advance_commit(&mut self) {
        if !self.is_leader() {
            return;
        }
        let mut indices: Vec<u64> = self.storage.conf_state().voters.iter()
            .map(|v| *self.match_index.get(v).unwrap_or(&0))
            .collect();
        indices.sort_unstable();
        let quorum = self.quorum();
        if indices.len() < quorum {
            return;
        }
        let candidate = indices[indices.len() - quorum];
        if candidate > self.commit_index {
            // Only commit entries from the current term directly (Raft
            // §5.4.2); earlier-term entries ride along once an entry of
            // the current term is committed.
            if self.storage.term_at(candidate) == Some(self.term) {
                let newly_committed = self.storage.slice(self.commit_index + 1, candidate + 1);
                let freed: u64 = newly_committed.iter().map(|e| e.data.len() as u64).sum();
                self.uncommitted_size = self.uncommitted_size.saturating_sub(freed);
                self.commit_index = candidate;
            }
        }
    }

    // ---- message handling ---------------------------------------------------

    pub fn step(&mut self, m: Message) {
        if m.term > self.term {
            let leader = if matches!(m.msg_type, MessageType::Append | MessageType::Heartbeat | MessageType::Snapshot) {
                m.from
            } else {
                0
            };
            self.become_follower(m.term, leader);
        } else if m.term < self.term && m.term != 0 {
            // Stale message from a previous term; drop it.
            return;
        }

        match m.msg_type {
            MessageType::Vote => self.handle_vote_request(m),
            MessageType::VoteResponse => self.handle_vote_response(m),
            MessageType::Append => self.handle_append(m),
            MessageType::AppendResponse => self.handle_append_response(m),
            MessageType::Heartbeat => self.handle_heartbeat(m),
            MessageType::HeartbeatResponse => {}
            MessageType::Snapshot => self.handle_snapshot(m),
            MessageType::LinkHeartbeat => {}
        }
    }

    fn handle_vote_request(&mut self, m: Message) {
        let can_vote = (self.vote == 0 || self.vote == m.from) && self.log_is_up_to_date(m.log_term, m.index);
        let mut resp = Message::new(MessageType::VoteResponse, self.id, m.from, self.term);
        if can_vote {
            self.vote = m.from;
            self.election_elapsed = 0;
            resp.reject = false;
        } else {
            resp.reject = true;
        }
        self.msgs.push(resp);
    }

    fn log_is_up_to_date(&self, candidate_last_term: u64, candidate_last_index: u64) -> bool {
        let my_last_term = self.storage.last_term();
        let my_last_index = self.storage.last_index();
        candidate_last_term > my_last_term
            || (candidate_last_term == my_last_term && candidate_last_index >= my_last_index)
    }

    fn handle_vote_response(&mut self, m: Message) {
        if self.role != Role::Candidate {
            return;
        }
        self.votes.insert(m.from, !m.reject);
        let granted = self.votes.values().filter(|v| **v).count();
        let rejected = self.votes.values().filter(|v| !**v).count();
        if granted >= self.quorum() {
            self.become_leader();
        } else if rejected >= self.quorum() {
            self.become_follower(self.term, 0);
        }
    }

    fn handle_append(&mut self, m: Message) {
        self.leader_id = m.from;
        self.election_elapsed = 0;
        let mut resp = Message::new(MessageType::AppendResponse, self.id, m.from, self.term);

        let matches_prev = m.index == 0 || self.storage.term_at(m.index) == Some(m.log_term);
        if !matches_prev {
            resp.reject = true;
            resp.reject_hint = self.storage.last_index().min(m.index);
            self.msgs.push(resp);
            return;
        }

        if !m.entries.is_empty() {
            self.storage.append(&m.entries);
        }
        let last_new_index = m.index + m.entries.len() as u64;
        if m.commit > self.commit_index {
            self.commit_index = m.commit.min(last_new_index);
        }
        resp.reject = false;
        resp.index = last_new_index;
        self.msgs.push(resp);
    }

    fn handle_append_response(&mut self, m: Message) {
        if !self.is_leader() {
            return;
        }
        if m.reject {
            let next = self.next_index.get(&m.from).copied().unwrap_or(1);
            let retry_from = m.reject_hint.min(next.saturating_sub(1)).max(1);
            self.next_index.insert(m.from, retry_from);
            self.send_append(m.from);
            return;
        }
        self.match_index.insert(m.from, m.index);
        self.next_index.insert(m.from, m.index + 1);
        self.maybe_advance_commit();
        if self.storage.last_index() >= self.next_index.get(&m.from).copied().unwrap_or(0) {
            self.send_append(m.from);
        }
    }

    fn handle_heartbeat(&mut self, m: Message) {
        self.leader_id = m.from;
        self.election_elapsed = 0;
        if m.commit > self.commit_index {
            self.commit_index = m.commit.min(self.storage.last_index());
        }
        let resp = Message::new(MessageType::HeartbeatResponse, self.id, m.from, self.term);
        self.msgs.push(resp);
    }

    fn handle_snapshot(&mut self, m: Message) {
        self.leader_id = m.from;
        self.election_elapsed = 0;
        if let Some(snap) = m.snapshot {
            let index = snap.metadata.index;
            if index > self.storage.last_index() || self.storage.entry_at(index).is_none() {
                self.storage.apply_snapshot(snap.clone());
                self.commit_index = self.commit_index.max(index);
                // The driver must persist this before it is reflected
                // anywhere else, so hand it back through the next
                // `ready()` rather than treating the in-memory install
                // as sufficient.
                self.pending_snapshot = Some(snap);
            }
        }
        let mut resp = Message::new(MessageType::AppendResponse, self.id, m.from, self.term);
        resp.index = self.storage.last_index();
        self.msgs.push(resp);
    }

    pub fn report_unreachable(&mut self, _id: u64) {
        // Stateless here: the transport layer owns retry/backoff and
        // peer status, the core just keeps trying on the next tick via
        // `send_append`.
    }

    pub fn report_snapshot(&mut self, id: u64, status: SnapshotStatus) {
        if status == SnapshotStatus::Failure {
            if let Some(next) = self.next_index.get_mut(&id) {
                *next = (*next).saturating_sub(1).max(1);
            }
        }
    }

    // ---- durable compaction --------------------------------------------------

    /// Record that the state machine has persisted a snapshot through
    /// `index`/`term`; the in-memory log prefix up to it can be dropped.
    /// `applied_state` is handed back to the caller only for symmetry with
    /// `original_source`'s `maybeTriggerSnapshot`; this core does not
    /// serialize application state itself.
    pub fn compact(&mut self, index: u64, term: u64) {
        self.storage.compact(index, term);
    }

    pub fn conf_state(&self) -> ConfState {
        self.storage.conf_state().clone()
    }

    pub fn term_at(&self, index: u64) -> Option<u64> {
        self.storage.term_at(index)
    }

    // ---- Ready / Advance --------------------------------------------------

    pub fn has_ready(&self) -> bool {
        let hs = HardState { term: self.term, vote: self.vote, commit: self.commit_index };
        !self.msgs.is_empty()
            || hs != self.prev_hard_state
            || self.soft_state() != self.prev_soft_state
            || self.storage.compacted_index() > self.prev_hard_state.commit
            || !self.unpersisted_entries().is_empty()
            || !self.newly_committed().is_empty()
            || self.pending_snapshot.is_some()
    }

    fn soft_state(&self) -> SoftState {
        SoftState { leader_id: self.leader_id, is_leader: self.is_leader() }
    }

    fn unpersisted_entries(&self) -> Vec<Entry> {
        // Every entry is "unpersisted" from the core's point of view until
        // the driver calls `advance`; the core does not track a separate
        // stable-index watermark, mirroring `original_source`'s reliance
        // on the caller to call `Advance` promptly.
        self.storage.slice(self.last_advanced_index + 1, self.storage.last_index() + 1)
    }

    fn newly_committed(&self) -> Vec<Entry> {
        self.storage.slice(self.last_applied + 1, self.commit_index + 1)
    }

    /// Drain the current batch of outputs for the driver to persist,
    /// transport, and apply. Call `advance` once that is done.
    pub fn ready(&mut self) -> Ready {
        let hs = HardState { term: self.term, vote: self.vote, commit: self.commit_index };
        let hard_state = if hs != self.prev_hard_state { Some(hs) } else { None };
        let ss = self.soft_state();
        let soft_state = if ss != self.prev_soft_state { Some(ss) } else { None };

        let entries = self.unpersisted_entries();
        let committed_entries = self.newly_committed();
        let messages = std::mem::take(&mut self.msgs);
        let snapshot = self.pending_snapshot.take();

        Ready {
            soft_state,
            hard_state,
            entries,
            snapshot,
            messages,
            committed_entries,
        }
    }

    /// Acknowledge that the last `ready()` batch has been durably
    /// persisted and its committed entries applied to the state machine.
    pub fn advance(&mut self, ready: &Ready) {
        if let Some(hs) = ready.hard_state {
            self.prev_hard_state = hs;
        }
        if let Some(ss) = ready.soft_state {
            self.prev_soft_state = ss;
        }
        if let Some(snap) = &ready.snapshot {
            self.last_advanced_index = snap.metadata.index;
            self.last_applied = snap.metadata.index;
        }
        if let Some(last) = ready.entries.last() {
            self.last_advanced_index = last.index;
        }
        if let Some(last) = ready.committed_entries.last() {
            self.last_applied = last.index;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_node_cluster_self_elects_and_commits_immediately() {
        let mut core = RaftCore::new_starting(1, vec![1], 10, 1);
        assert!(core.is_leader());
        let idx = core.propose(b"hello".to_vec()).unwrap();
        assert_eq!(core.commit_index(), idx);
    }

    #[test]
    fn joining_follower_times_out_and_campaigns() {
        let mut core = RaftCore::new_joining(2, 3, 1);
        let mut cs = ConfState::default();
        cs.add(1);
        cs.add(2);
        core.storage.set_conf_state(cs);
        assert!(!core.is_leader());
        for _ in 0..10 {
            core.tick();
        }
        assert_eq!(core.role, Role::Candidate);
        let ready = core.ready();
        assert!(ready.messages.iter().any(|m| m.msg_type == MessageType::Vote));
    }

    #[test]
    fn two_node_leader_replicates_and_commits_on_quorum_ack() {
        let mut leader = RaftCore::new_starting(1, vec![1], 10, 1);
        let mut cs = leader.conf_state();
        cs.add(2);
        leader.storage.set_conf_state(cs);
        leader.next_index.insert(2, leader.storage.last_index() + 1);
        leader.match_index.insert(2, 0);

        let idx = leader.propose(b"x".to_vec()).unwrap();
        let ready = leader.ready();
        let append = ready
            .messages
            .iter()
            .find(|m| m.msg_type == MessageType::Append && m.to == 2)
            .expect("leader should send an append to the new follower");

        let mut resp = Message::new(MessageType::AppendResponse, 2, 1, append.term);
        resp.index = append.index + append.entries.len() as u64;
        leader.step(resp);

        assert_eq!(leader.commit_index(), idx);
    }

    #[test]
    fn vote_is_rejected_for_stale_candidate_log() {
        let mut follower = RaftCore::new_joining(2, 10, 1);
        let mut cs = ConfState::default();
        cs.add(1);
        cs.add(2);
        follower.storage.set_conf_state(cs);
        follower.storage.append(&[Entry {
            index: 1,
            term: 5,
            kind: EntryKind::Normal,
            data: vec![],
        }]);

        let mut vote_req = Message::new(MessageType::Vote, 1, 2, 6);
        vote_req.index = 0;
        vote_req.log_term = 0;
        follower.step(vote_req);

        let ready = follower.ready();
        let resp = ready
            .messages
            .iter()
            .find(|m| m.msg_type == MessageType::VoteResponse)
            .unwrap();
        assert!(resp.reject);
    }

    #[test]
    fn restart_does_not_replay_already_durable_entries_as_ready() {
        let entries = vec![
            Entry { index: 1, term: 1, kind: EntryKind::Normal, data: vec![1] },
            Entry { index: 2, term: 1, kind: EntryKind::Normal, data: vec![2] },
        ];
        let hs = HardState { term: 1, vote: 1, commit: 2 };
        let mut cs = ConfState::default();
        cs.add(1);
        let mut core = RaftCore::restart(1, cs, hs, SnapshotMetadata::default(), entries, 10, 1);
        let ready = core.ready();
        assert!(ready.entries.is_empty());
        assert!(ready.committed_entries.is_empty());
    }
}
