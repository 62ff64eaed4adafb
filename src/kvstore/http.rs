//! The illustrative state machine's external surface.
//!
//! Grounded on `original_source/raftsvr/httpapi.go`'s `httpKVAPI`: a bare
//! `GET`/`PUT` pair over the map, plus a conf-change endpoint that proposes
//! membership changes the same way a `PUT` proposes a key. Built in the
//! `api::rest` style of an `axum::Router` over a shared `State`. This
//! illustrative state machine's surface is specified only at its
//! interface, so it stays deliberately minimal rather than growing into
//! a full SQL/GraphQL surface.

use super::KvStore;
use crate::consensus::{ConfChange, ConfChangeType};
use crate::driver::Proposer;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub struct KvApiState {
    pub store: KvStore,
    pub proposer: Proposer,
}

pub fn router(state: Arc<KvApiState>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/kv/{key}", get(get_key).put(put_key))
        .route("/cluster/conf-change", post(conf_change))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

async fn get_key(State(state): State<Arc<KvApiState>>, Path(key): Path<String>) -> Response {
    match state.store.lookup(&key) {
        Some(val) => val.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn put_key(State(state): State<Arc<KvApiState>>, Path(key): Path<String>, body: String) -> Response {
    match state.store.propose(&state.proposer, key, body).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ConfChangeRequest {
    Add { node_id: u64, url: String },
    Remove { node_id: u64 },
}

async fn conf_change(State(state): State<Arc<KvApiState>>, Json(req): Json<ConfChangeRequest>) -> Response {
    let cc = match req {
        ConfChangeRequest::Add { node_id, url } => ConfChange {
            id: 0,
            change_type: ConfChangeType::AddNode,
            node_id,
            context: url.into_bytes(),
        },
        ConfChangeRequest::Remove { node_id } => ConfChange {
            id: 0,
            change_type: ConfChangeType::RemoveNode,
            node_id,
            context: Vec::new(),
        },
    };
    match state.proposer.propose_conf_change(cc).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}
