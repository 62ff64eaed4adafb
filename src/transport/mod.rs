//! HTTP-based peer transport.
//!
//! Grounded on `original_source/utils/api/rafthttp/*`: each peer gets a
//! [`peer::PeerSender`] (bounded queue + background `reqwest` sender,
//! grounded on `remote.go`/the unnamed `pipeline`), address failover via
//! [`urlpick::UrlPicker`] (`urlpick.go`), liveness tracking via
//! [`status::PeerStatus`] (`peer_status.go`), and periodic health/clock
//! checks via [`prober::spawn_prober`] (`probing_status.go`). Inbound
//! traffic is served by [`server::router`], built in the same
//! `api::rest` axum style.

mod codec;
mod metrics;
mod peer;
mod prober;
pub mod server;
mod status;
mod urlpick;

pub use codec::{decode_message, encode_message};
pub use metrics::{snapshot_all, snapshot_peer, PeerSnapshot};
pub use peer::PeerSender;
pub use server::{router, ServerState};
pub use status::{PeerStatus, ProbeSample};

use crate::consensus::{Message, SnapshotStatus};
use crate::error::{NodeError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Shared, read-only view of every peer's liveness/traffic counters, kept
/// in sync by [`PeerTransport`] as peers are added or removed. Cloning
/// this handle lets callers outside the driver (e.g. [`crate::driver::NodeHandle`])
/// read metrics without owning the transport itself.
pub type SharedStatuses = Arc<RwLock<HashMap<u64, Arc<status::PeerStatus>>>>;

/// Fed back from a peer sender to the driver's readiness loop so `RaftCore`
/// can slow its retries to an unreachable peer, or reissue a snapshot
/// that failed in flight.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Unreachable(u64),
    Snapshot(u64, SnapshotStatus),
}

/// Owns the outbound sender for every peer in the cluster and dispatches
/// `RaftCore`-produced messages to the right one.
pub struct PeerTransport {
    local_id: u64,
    client: reqwest::Client,
    read_timeout: Duration,
    queue_depth: usize,
    peers: HashMap<u64, PeerSender>,
    statuses: SharedStatuses,
    events_tx: mpsc::Sender<TransportEvent>,
    probers: HashMap<u64, tokio::task::JoinHandle<()>>,
}

impl PeerTransport {
    pub fn new(
        local_id: u64,
        read_timeout: Duration,
        queue_depth: usize,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .build()
            .expect("reqwest client builds with default TLS config");
        let (events_tx, events_rx) = mpsc::channel(1024);
        (
            Self {
                local_id,
                client,
                read_timeout,
                queue_depth,
                peers: HashMap::new(),
                statuses: Arc::new(RwLock::new(HashMap::new())),
                events_tx,
                probers: HashMap::new(),
            },
            events_rx,
        )
    }

    /// Start a sender, attach a prober, and register the peer's status for
    /// `send_all`/`metrics_snapshot`. `urls[0]` (the peer's primary
    /// advertised address) is what the prober polls; `UrlPicker` inside
    /// the sender handles failover across the rest for actual traffic.
    pub fn add_peer(&mut self, peer_id: u64, urls: Vec<String>) {
        let primary_url = urls.first().cloned().unwrap_or_default();
        let sender = PeerSender::start(
            self.local_id,
            peer_id,
            urls,
            self.client.clone(),
            self.read_timeout,
            self.events_tx.clone(),
            self.queue_depth,
        );
        let status = sender.status.clone();
        let prober = prober::spawn_prober(peer_id, primary_url, self.client.clone(), move |sample| {
            status.record_probe(sample);
        });
        self.probers.insert(peer_id, prober);
        self.statuses.write().insert(peer_id, sender.status.clone());
        self.peers.insert(peer_id, sender);
    }

    pub fn remove_peer(&mut self, peer_id: u64) {
        self.peers.remove(&peer_id);
        self.statuses.write().remove(&peer_id);
        if let Some(prober) = self.probers.remove(&peer_id) {
            prober.abort();
        }
    }

    /// A cloneable, always-current handle to every peer's status, usable
    /// from outside the task that owns this transport.
    pub fn shared_statuses(&self) -> SharedStatuses {
        self.statuses.clone()
    }

    /// Dispatch every message produced by a `Ready` batch to its
    /// destination peer, dropping messages addressed to unknown peers
    /// (a conf-change race, not a bug worth propagating).
    pub fn send_all(&self, messages: Vec<Message>) {
        for m in messages {
            match self.peers.get(&m.to) {
                Some(peer) => peer.send(m),
                None => tracing::warn!(to = m.to, "dropping message to unknown peer"),
            }
        }
    }

    pub fn status_of(&self, peer_id: u64) -> Result<Arc<status::PeerStatus>> {
        self.peers
            .get(&peer_id)
            .map(|p| p.status.clone())
            .ok_or(NodeError::UnknownPeer(peer_id))
    }

    pub fn metrics_snapshot(&self) -> Vec<PeerSnapshot> {
        self.peers.iter().map(|(id, p)| metrics::snapshot_peer(*id, &p.status)).collect()
    }
}
