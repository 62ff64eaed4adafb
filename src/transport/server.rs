// Inbound HTTP endpoint for peer raft traffic.
//
// Grounded on `original_source/utils/api/rafthttp` (the `X-Raft-To`/
// `X-Raft-From`/`X-Etcd-Cluster-ID` header contract) and the
// `api::rest::server` style of building an `axum::Router` with
// `tower-http` middleware layered on top.

use super::codec::decode_message;
use crate::consensus::Message;
use crate::error::NodeError;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub struct ServerState {
    pub local_id: u64,
    pub cluster_id: u64,
    pub inbound: tokio::sync::mpsc::Sender<Message>,
    pub member_removed: std::sync::atomic::AtomicBool,
}

pub fn router(state: Arc<ServerState>, read_timeout: Duration) -> Router {
    Router::new()
        .route("/raft", post(handle_message))
        .route("/probing", get(handle_ping))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(read_timeout))
        .with_state(state)
}

/// Answers the peer-liveness/clock-drift prober (`prober::spawn_prober`)
/// with the local epoch time, independent of the message pipeline.
async fn handle_ping() -> Response {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    (StatusCode::OK, [("x-server-time-ms", now_ms.to_string())]).into_response()
}

fn check_headers(state: &ServerState, headers: &HeaderMap) -> Result<(), NodeError> {
    if state.member_removed.load(std::sync::atomic::Ordering::Relaxed) {
        return Err(NodeError::MemberRemoved);
    }
    if let Some(remote_cluster) = headers
        .get("x-etcd-cluster-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| u64::from_str_radix(v, 16).ok())
    {
        if remote_cluster != state.cluster_id {
            return Err(NodeError::ClusterIdMismatch { local: state.cluster_id, remote: remote_cluster });
        }
    }
    Ok(())
}

async fn handle_message(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(e) = check_headers(&state, &headers) {
        return node_error_response(e);
    }
    let msg = match decode_message(&body) {
        Ok(m) => m,
        Err(e) => return node_error_response(e),
    };
    if msg.to != state.local_id {
        return (StatusCode::BAD_REQUEST, format!("message addressed to {:#x}, not this node", msg.to))
            .into_response();
    }
    if state.inbound.try_send(msg).is_err() {
        tracing::warn!("inbound raft message dropped, driver is not keeping up");
    }
    StatusCode::NO_CONTENT.into_response()
}

fn node_error_response(e: NodeError) -> Response {
    let status = match e {
        // The sender's cluster ID doesn't match ours: its view of the
        // world is stale, not ours, so this is a client error.
        NodeError::ClusterIdMismatch { .. } => StatusCode::BAD_REQUEST,
        // This node itself has been removed from the cluster: every
        // future request against it is permanently invalid.
        NodeError::MemberRemoved => StatusCode::GONE,
        NodeError::Decode(_) | NodeError::Encode(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_id_mismatch_maps_to_400() {
        let resp = node_error_response(NodeError::ClusterIdMismatch { local: 1, remote: 2 });
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn member_removed_maps_to_410() {
        let resp = node_error_response(NodeError::MemberRemoved);
        assert_eq!(resp.status(), StatusCode::GONE);
    }
}
