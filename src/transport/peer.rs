// Outbound sender for one remote peer.
//
// Grounded on `original_source/utils/api/rafthttp/remote.go` and its
// `pipeline`: each peer gets a bounded channel and a background task
// draining it over HTTP via `reqwest`; a full channel drops the message
// rather than blocking the driver (`remote.send`'s `select { default: }`),
// since a raft message is safe to drop and will be retried by the
// consensus core's own retransmission.

use super::codec::encode_message;
use super::status::PeerStatus;
use super::urlpick::UrlPicker;
use super::TransportEvent;
use crate::consensus::{Message, MessageType, SnapshotStatus};
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct PeerSender {
    id: u64,
    tx: mpsc::Sender<Message>,
    pub status: Arc<PeerStatus>,
    picker: Arc<UrlPicker>,
}

impl PeerSender {
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        local_id: u64,
        peer_id: u64,
        urls: Vec<String>,
        client: reqwest::Client,
        read_timeout: Duration,
        events_tx: mpsc::Sender<TransportEvent>,
        queue_depth: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_depth);
        let status = Arc::new(PeerStatus::new(local_id, peer_id));
        let picker = Arc::new(UrlPicker::new(urls));

        tokio::spawn(run_pipeline(peer_id, rx, client, picker.clone(), status.clone(), read_timeout, events_tx));

        Self { id: peer_id, tx, status, picker }
    }

    /// Enqueue a message for delivery. Never blocks: a full queue means
    /// the peer is falling behind and the message is dropped, same as
    /// `original_source`'s pipeline.
    pub fn send(&self, m: Message) {
        if self.tx.try_send(m).is_err() {
            tracing::warn!(peer = self.id, "dropped message, send queue is full");
        }
    }

    pub fn report_unreachable(&self, url: &str) {
        self.picker.unreachable(url);
    }

    pub fn update_urls(&self, urls: Vec<String>) {
        self.picker.update(urls);
    }
}

async fn run_pipeline(
    peer_id: u64,
    mut rx: mpsc::Receiver<Message>,
    client: reqwest::Client,
    picker: Arc<UrlPicker>,
    status: Arc<PeerStatus>,
    read_timeout: Duration,
    events_tx: mpsc::Sender<TransportEvent>,
) {
    while let Some(msg) = rx.recv().await {
        let is_snapshot = msg.msg_type == MessageType::Snapshot;
        let url = picker.pick();
        match send_one(&client, &url, &msg, read_timeout).await {
            Ok(bytes) => {
                status.record_sent(bytes);
                if is_snapshot {
                    status.metrics.snapshots_sent.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    let _ = events_tx.send(TransportEvent::Snapshot(peer_id, SnapshotStatus::Finish)).await;
                }
            }
            Err(e) => {
                status.record_send_failure(&e.to_string());
                picker.unreachable(&url);
                if is_snapshot {
                    status.metrics.snapshots_failed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    let _ = events_tx.send(TransportEvent::Snapshot(peer_id, SnapshotStatus::Failure)).await;
                } else {
                    let _ = events_tx.send(TransportEvent::Unreachable(peer_id)).await;
                }
            }
        }
    }
}

async fn send_one(client: &reqwest::Client, base_url: &str, msg: &Message, timeout: Duration) -> Result<usize> {
    let body = encode_message(msg)?;
    let len = body.len();
    let url = format!("{}/raft", base_url.trim_end_matches('/'));
    client
        .post(url)
        .timeout(timeout)
        .header("content-type", "application/octet-stream")
        .body(body)
        .send()
        .await
        .map_err(|e| crate::error::NodeError::Transport(e.to_string()))?
        .error_for_status()
        .map_err(|e| crate::error::NodeError::Transport(e.to_string()))?;
    Ok(len)
}
