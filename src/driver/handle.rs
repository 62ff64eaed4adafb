// Public handle for talking to a running node driver.
//
// Mirrors the channel quartet `original_source/node/raft.go`'s
// `RaftConfig` wires up (`ProposeC`/`ConfChangeC`/`CommitC`/`ErrorC`),
// translated from raw Go channels into `tokio::sync::mpsc`.

use crate::consensus::ConfChange;
use crate::error::NodeError;
use tokio::sync::mpsc;

/// One item delivered on the commit stream.
#[derive(Debug)]
pub enum Commit {
    /// A committed, applied proposal's raw bytes.
    Data(Vec<u8>),
    /// Sentinel: either WAL replay just finished (on startup, before any
    /// live entries) or the state machine must reload itself from the
    /// snapshot the driver is about to publish. Both cases mean "your
    /// view of the data is about to change out from under incremental
    /// application; resync."
    LoadSnapshot,
}

pub struct NodeHandle {
    pub(super) propose_tx: mpsc::Sender<Vec<u8>>,
    pub(super) conf_change_tx: mpsc::Sender<ConfChange>,
    pub(super) commit_rx: mpsc::Receiver<Commit>,
    pub(super) error_rx: mpsc::Receiver<NodeError>,
    pub(super) leader_change_rx: mpsc::Receiver<bool>,
}

impl NodeHandle {
    pub async fn propose(&self, data: Vec<u8>) -> Result<(), NodeError> {
        self.propose_tx.send(data).await.map_err(|_| NodeError::Stopped)
    }

    pub async fn propose_conf_change(&self, cc: ConfChange) -> Result<(), NodeError> {
        self.conf_change_tx.send(cc).await.map_err(|_| NodeError::Stopped)
    }

    pub async fn next_commit(&mut self) -> Option<Commit> {
        self.commit_rx.recv().await
    }

    pub async fn next_error(&mut self) -> Option<NodeError> {
        self.error_rx.recv().await
    }

    /// `true` when this node just became leader, `false` when it lost
    /// leadership or another node took over.
    pub async fn next_leader_change(&mut self) -> Option<bool> {
        self.leader_change_rx.recv().await
    }

    /// A cheap, cloneable handle to just the propose/conf-change senders,
    /// for callers (like an HTTP API) that need to submit work but never
    /// drain commits or errors themselves.
    pub fn proposer(&self) -> Proposer {
        Proposer { propose_tx: self.propose_tx.clone(), conf_change_tx: self.conf_change_tx.clone() }
    }
}

#[derive(Clone)]
pub struct Proposer {
    propose_tx: mpsc::Sender<Vec<u8>>,
    conf_change_tx: mpsc::Sender<ConfChange>,
}

impl Proposer {
    pub async fn propose(&self, data: Vec<u8>) -> Result<(), NodeError> {
        self.propose_tx.send(data).await.map_err(|_| NodeError::Stopped)
    }

    pub async fn propose_conf_change(&self, cc: ConfChange) -> Result<(), NodeError> {
        self.conf_change_tx.send(cc).await.map_err(|_| NodeError::Stopped)
    }
}
