// The node driver: owns the consensus core exclusively and runs the
// readiness loop that turns its output into durable WAL writes,
// transported messages, and applied commits.
//
// Grounded on `original_source/node/raft.go`'s `raftNode`/`serveChannels`:
// the tick timer, `Ready` channel, proposal/conf-change forwarding, and
// transport error channel are all handled in one `select` there; here
// they are one `tokio::select!` loop, since `RaftCore` is synchronous and
// exclusively owned by this task rather than the Go version's actor with
// its own goroutine.

use crate::cluster::Cluster;
use crate::config::NodeConfig;
use crate::consensus::{
    ConfChange, ConfChangeType, ConfState, EntryKind, Message, RaftCore, Ready, Snapshot,
    SnapshotMetadata,
};
use crate::error::{NodeError, Result};
use crate::snapshot::Snapshotter;
use crate::transport::{PeerTransport, TransportEvent};
use crate::wal::{Wal, WalMetadata};
use std::path::Path;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::handle::{Commit, NodeHandle};

pub type SnapshotSource = Box<dyn Fn() -> Vec<u8> + Send + Sync>;

const CHANNEL_DEPTH: usize = 4096;

pub struct NodeDriver {
    core: RaftCore,
    wal: Wal,
    snapshotter: Snapshotter,
    transport: PeerTransport,
    config: NodeConfig,
    node_id: u64,

    applied_index: u64,
    snapshot_index: u64,
    conf_state: ConfState,
    last_replayed_index: u64,

    get_snapshot: SnapshotSource,

    propose_rx: mpsc::Receiver<Vec<u8>>,
    conf_change_rx: mpsc::Receiver<ConfChange>,
    conf_change_seq: u64,
    pub inbound_tx: mpsc::Sender<Message>,
    inbound_rx: mpsc::Receiver<Message>,
    transport_events: mpsc::Receiver<TransportEvent>,

    commit_tx: mpsc::Sender<Commit>,
    error_tx: mpsc::Sender<NodeError>,
    leader_change_tx: mpsc::Sender<bool>,
}

impl NodeDriver {
    /// Open (creating if necessary) the WAL and snapshot directories,
    /// replay whatever is on disk, reconstruct the consensus core, and
    /// return a driver plus the handle its owner uses to propose work and
    /// consume commits. Mirrors `replayWAL` + `startRaft` up to the point
    /// `serveChannels` starts running.
    pub fn bootstrap(
        config: NodeConfig,
        cluster: Cluster,
        cluster_id: u64,
        get_snapshot: SnapshotSource,
    ) -> Result<(Self, NodeHandle)> {
        let node = cluster
            .get(&config.node_name)
            .ok_or_else(|| NodeError::Config(format!("node {:?} not in cluster descriptor", config.node_name)))?;
        let node_id = node.id;

        let wal_dir_owned = config.wal_dir();
        let wal_dir = Path::new(&wal_dir_owned);
        let snap_dir_owned = config.snap_dir();
        let snap_dir = Path::new(&snap_dir_owned);
        let snapshotter = Snapshotter::new(snap_dir);

        let loaded_snapshot = match snapshotter.load() {
            Ok(s) => Some(s),
            Err(NodeError::NoSnapshot) => None,
            Err(e) => return Err(e),
        };

        let snapshot_meta = loaded_snapshot
            .as_ref()
            .map(|s| s.metadata)
            .unwrap_or_default();

        let wal_existed = wal_dir.exists() && std::fs::read_dir(wal_dir)?.next().is_some();
        let (mut wal, replayed) = if wal_existed {
            Wal::open(wal_dir, config.wal_segment_size, snapshot_meta.index)?
        } else {
            let meta = WalMetadata { cluster_id, node_id };
            let wal = Wal::create(wal_dir, config.wal_segment_size, &meta)?;
            (
                wal,
                crate::wal::Replayed {
                    metadata: meta,
                    hard_state: Default::default(),
                    conf_state: ConfState::default(),
                    snapshot_pointer: None,
                    entries: Vec::new(),
                },
            )
        };

        if replayed.metadata.cluster_id != cluster_id {
            return Err(NodeError::ClusterIdMismatch {
                local: cluster_id,
                remote: replayed.metadata.cluster_id,
            });
        }

        let conf_state = loaded_snapshot
            .as_ref()
            .map(|s| s.conf_state.clone())
            .unwrap_or_else(|| replayed.conf_state.clone());

        let last_replayed_index = replayed.entries.last().map(|e| e.index).unwrap_or(snapshot_meta.index);

        let mut core = if wal_existed {
            RaftCore::restart(
                node_id,
                conf_state.clone(),
                replayed.hard_state,
                snapshot_meta,
                replayed.entries,
                config.election_tick,
                config.heartbeat_tick,
            )
        } else if config.join {
            RaftCore::new_joining(node_id, config.election_tick, config.heartbeat_tick)
        } else {
            let initial_voters: Vec<u64> = cluster.members().map(|m| m.id).collect();
            RaftCore::new_starting(node_id, initial_voters, config.election_tick, config.heartbeat_tick)
        };
        core.set_max_uncommitted_size(config.max_uncommitted_size);
        core.set_max_size_per_msg(config.max_size_per_msg);

        let (mut transport, transport_events) =
            PeerTransport::new(node_id, config.conn_read_timeout(), config.pipeline_queue_depth);
        for peer in cluster.peers_other_than(&config.node_name) {
            transport.add_peer(peer.id, vec![peer.url.clone()]);
        }

        if let Some(snap) = &loaded_snapshot {
            if replayed.snapshot_pointer.map(|p| p.index).unwrap_or(0) < snap.metadata.index {
                wal.save_snapshot_pointer(&snap.metadata)?;
                wal.sync()?;
            }
        }

        let (propose_tx, propose_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (conf_change_tx, conf_change_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (commit_tx, commit_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (error_tx, error_rx) = mpsc::channel(1);
        let (leader_change_tx, leader_change_rx) = mpsc::channel(CHANNEL_DEPTH);

        let driver = Self {
            core,
            wal,
            snapshotter,
            transport,
            config,
            node_id,
            applied_index: snapshot_meta.index,
            snapshot_index: snapshot_meta.index,
            conf_state,
            last_replayed_index,
            get_snapshot,
            propose_rx,
            conf_change_rx,
            conf_change_seq: 0,
            inbound_tx,
            inbound_rx,
            transport_events,
            commit_tx,
            error_tx,
            leader_change_tx,
        };

        let handle = NodeHandle { propose_tx, conf_change_tx, commit_rx, error_rx, leader_change_rx };
        Ok((driver, handle))
    }

    pub fn inbound_sender(&self) -> mpsc::Sender<Message> {
        self.inbound_tx.clone()
    }

    /// Run the readiness loop until the node is removed from the cluster
    /// or a fatal transport/WAL error occurs. Consumes `self`; equivalent
    /// to `serveChannels` plus `writeError`/`stop`.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Runs independently of snapshot-triggered compaction, so files
        // left behind by a failed purge (or by restarts that bumped
        // max_wal_files/max_snap_files down) still get swept on a
        // fixed cadence rather than only when a new snapshot fires.
        let mut purge_ticker = tokio::time::interval(self.config.purge_interval());
        purge_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if self.last_replayed_index == 0 {
            let _ = self.commit_tx.send(Commit::LoadSnapshot).await;
        }

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.core.tick();
                }
                _ = purge_ticker.tick() => {
                    self.periodic_purge();
                }
                Some(data) = self.propose_rx.recv() => {
                    if let Err(e) = self.core.propose(data) {
                        tracing::debug!(error = %e, "dropped proposal");
                    }
                }
                Some(mut cc) = self.conf_change_rx.recv() => {
                    self.conf_change_seq += 1;
                    cc.id = self.conf_change_seq;
                    if let Err(e) = self.core.propose_conf_change(cc) {
                        tracing::debug!(error = %e, "dropped conf change");
                    }
                }
                Some(msg) = self.inbound_rx.recv() => {
                    self.core.step(msg);
                }
                Some(event) = self.transport_events.recv() => {
                    match event {
                        TransportEvent::Unreachable(id) => self.core.report_unreachable(id),
                        TransportEvent::Snapshot(id, status) => self.core.report_snapshot(id, status),
                    }
                }
                else => break,
            }

            if self.core.has_ready() {
                let ready = self.core.ready();
                if !self.process_ready(&ready).await {
                    break;
                }
                self.core.advance(&ready);
            }
        }
    }

    /// Returns `false` if the node should stop (it was removed from the
    /// cluster, or persistence failed fatally).
    async fn process_ready(&mut self, ready: &Ready) -> bool {
        if let Err(e) = self.persist(ready) {
            let _ = self.error_tx.send(e).await;
            return false;
        }

        if let Some(ss) = ready.soft_state {
            if ss.leader_id == 0 {
                tracing::warn!(node_id = %self.node_id, "soft state reports no known leader");
            } else if self.leader_change_tx.send(ss.is_leader).await.is_err() {
                return false;
            }
        }

        if let Some(snap) = &ready.snapshot {
            self.conf_state = snap.conf_state.clone();
            self.snapshot_index = snap.metadata.index;
            self.applied_index = snap.metadata.index;
            if self.commit_tx.send(Commit::LoadSnapshot).await.is_err() {
                return false;
            }
        }

        self.transport.send_all(ready.messages.clone());

        if !self.publish_committed(&ready.committed_entries).await {
            return false;
        }

        self.maybe_trigger_snapshot();
        true
    }

    fn persist(&mut self, ready: &Ready) -> Result<()> {
        if !ready.entries.is_empty() {
            self.wal.save_entries(&ready.entries)?;
        }
        if let Some(hs) = ready.hard_state {
            self.wal.save_hard_state(&hs)?;
        }
        self.wal.sync()?;
        if let Some(snap) = &ready.snapshot {
            // Save the snapshot index to the WAL before the snapshot file
            // itself, so a crash between the two steps never leaves a
            // snapshot on disk the WAL doesn't know to trust yet.
            self.wal.save_snapshot_pointer(&snap.metadata)?;
            self.wal.sync()?;
            self.snapshotter.save(snap)?;
        }
        Ok(())
    }

    async fn publish_committed(&mut self, entries: &[crate::consensus::Entry]) -> bool {
        for entry in entries {
            match entry.kind {
                EntryKind::Normal => {
                    if !entry.data.is_empty() && self.commit_tx.send(Commit::Data(entry.data.clone())).await.is_err() {
                        return false;
                    }
                }
                EntryKind::ConfChange => {
                    let Ok(cc) = serde_json::from_slice::<ConfChange>(&entry.data) else {
                        tracing::warn!("dropped malformed conf-change entry");
                        continue;
                    };
                    self.core.apply_conf_change(&cc);
                    self.conf_state = self.core.conf_state();
                    match cc.change_type {
                        ConfChangeType::AddNode => {
                            if !cc.context.is_empty() {
                                let url = String::from_utf8_lossy(&cc.context).into_owned();
                                self.transport.add_peer(cc.node_id, vec![url]);
                            }
                        }
                        ConfChangeType::RemoveNode => {
                            if cc.node_id == self.node_id {
                                tracing::info!("removed from the cluster, shutting down");
                                return false;
                            }
                            self.transport.remove_peer(cc.node_id);
                        }
                    }
                }
            }
            self.applied_index = entry.index;
            // Mirrors `publishEntries`' nil-commit sentinel: once we've
            // republished everything that was already on disk at
            // bootstrap, tell the state machine its view is now current
            // with live traffic.
            if self.last_replayed_index != 0 && entry.index == self.last_replayed_index {
                self.last_replayed_index = 0;
                if self.commit_tx.send(Commit::LoadSnapshot).await.is_err() {
                    return false;
                }
            }
        }
        true
    }

    fn maybe_trigger_snapshot(&mut self) {
        if self.applied_index < self.snapshot_index
            || self.applied_index - self.snapshot_index <= self.config.snapshot_count
        {
            return;
        }
        let Some(term) = self.core.term_at(self.applied_index) else {
            return;
        };
        let data = (self.get_snapshot)();
        let snap = Snapshot {
            metadata: SnapshotMetadata { index: self.applied_index, term },
            conf_state: self.conf_state.clone(),
            data,
        };
        // Record the pointer in the WAL before the snapshot file itself
        // exists, same order as `persist`, so a crash in between never
        // leaves a snapshot on disk the WAL doesn't know to trust yet.
        if let Err(e) = self.wal.save_snapshot_pointer(&snap.metadata) {
            tracing::error!(error = %e, "failed to record snapshot pointer in wal");
            return;
        }
        if let Err(e) = self.wal.sync() {
            tracing::error!(error = %e, "failed to sync wal after snapshot pointer");
            return;
        }
        if let Err(e) = self.snapshotter.save(&snap) {
            tracing::error!(error = %e, "failed to save triggered snapshot");
            return;
        }

        let compact_index = self.applied_index.saturating_sub(self.config.catch_up_entries).max(1);
        self.core.compact(compact_index, term);
        self.snapshot_index = self.applied_index;

        if let Err(e) = self.wal.purge(compact_index, self.config.max_wal_files) {
            tracing::warn!(error = %e, "wal purge failed");
        }
        if let Err(e) = crate::snapshot::purge_snapshots(self.snapshotter.dir(), self.config.max_snap_files) {
            tracing::warn!(error = %e, "snapshot purge failed");
        }
    }

    /// Re-run retention against the last established compaction boundary,
    /// on a fixed interval independent of new snapshots.
    fn periodic_purge(&mut self) {
        if let Err(e) = self.wal.purge(self.snapshot_index, self.config.max_wal_files) {
            tracing::warn!(error = %e, "periodic wal purge failed");
        }
        if let Err(e) = crate::snapshot::purge_snapshots(self.snapshotter.dir(), self.config.max_snap_files) {
            tracing::warn!(error = %e, "periodic snapshot purge failed");
        }
    }
}
