// Per-peer liveness state.
//
// Grounded on `original_source/utils/api/rafthttp/peer_status.go`:
// active/inactive is a simple two-state flag flipped on the first
// successful or failed send, logged on each transition, and backed by
// counters (`activePeers`/`disconnectedPeers` there) so an operator can
// see flapping peers without tailing logs.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

#[derive(Debug, Default)]
pub struct PeerMetrics {
    pub messages_sent: AtomicU64,
    pub messages_failed: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub snapshots_sent: AtomicU64,
    pub snapshots_failed: AtomicU64,
}

struct Inner {
    active: bool,
    since: Option<Instant>,
    last_probe: Option<ProbeSample>,
}

pub struct PeerStatus {
    local: u64,
    peer: u64,
    inner: Mutex<Inner>,
    pub metrics: PeerMetrics,
}

impl PeerStatus {
    pub fn new(local: u64, peer: u64) -> Self {
        Self {
            local,
            peer,
            inner: Mutex::new(Inner { active: false, since: None, last_probe: None }),
            metrics: PeerMetrics::default(),
        }
    }

    pub fn activate(&self) {
        let mut inner = self.inner.lock();
        if !inner.active {
            tracing::info!(local = self.local, peer = self.peer, "peer became active");
            inner.active = true;
            inner.since = Some(Instant::now());
        }
    }

    pub fn deactivate(&self, reason: &str) {
        let mut inner = self.inner.lock();
        if inner.active {
            tracing::warn!(local = self.local, peer = self.peer, reason, "peer became inactive");
            inner.active = false;
            inner.since = None;
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    pub fn active_since(&self) -> Option<Instant> {
        self.inner.lock().since
    }

    pub fn record_sent(&self, bytes: usize) {
        self.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.metrics.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.activate();
    }

    pub fn record_send_failure(&self, reason: &str) {
        self.metrics.messages_failed.fetch_add(1, Ordering::Relaxed);
        self.deactivate(reason);
    }

    /// Record a prober round trip. The prober does not drive routing
    /// decisions: this only updates the last-seen sample and, on a
    /// healthy probe, confirms liveness the same as a successful send
    /// would.
    pub fn record_probe(&self, sample: ProbeSample) {
        self.inner.lock().last_probe = Some(sample);
        if sample.healthy {
            self.activate();
        }
    }

    pub fn last_probe(&self) -> Option<ProbeSample> {
        self.inner.lock().last_probe
    }

    pub fn clock_drift(&self) -> Duration {
        self.inner.lock().last_probe.map(|s| s.clock_drift).unwrap_or_default()
    }
}

/// A lightweight clock-drift/health sample, reported by the prober on
/// each probe round trip.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSample {
    pub healthy: bool,
    pub round_trip: std::time::Duration,
    /// Difference between this node's clock and the peer's reported
    /// timestamp at send time.
    pub clock_drift: std::time::Duration,
    pub observed_at: SystemTime,
}
