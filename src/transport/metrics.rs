// Lightweight internal metrics registry for the transport layer.
//
// Grounded on `monitoring::metrics` (`Counter`/`Gauge` on top of
// `parking_lot`), not a full Prometheus exposition surface — no
// external metrics endpoint is exposed, but the driver still tracks
// counts internally so status/debug surfaces have something to report.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use super::status::PeerStatus;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PeerSnapshot {
    pub peer_id: u64,
    pub active: bool,
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub bytes_sent: u64,
    pub snapshots_sent: u64,
    pub snapshots_failed: u64,
}

pub fn snapshot_peer(id: u64, status: &PeerStatus) -> PeerSnapshot {
    PeerSnapshot {
        peer_id: id,
        active: status.is_active(),
        messages_sent: status.metrics.messages_sent.load(Ordering::Relaxed),
        messages_failed: status.metrics.messages_failed.load(Ordering::Relaxed),
        bytes_sent: status.metrics.bytes_sent.load(Ordering::Relaxed),
        snapshots_sent: status.metrics.snapshots_sent.load(Ordering::Relaxed),
        snapshots_failed: status.metrics.snapshots_failed.load(Ordering::Relaxed),
    }
}

pub fn snapshot_all(peers: &HashMap<u64, std::sync::Arc<PeerStatus>>) -> Vec<PeerSnapshot> {
    peers.iter().map(|(id, status)| snapshot_peer(*id, status)).collect()
}
