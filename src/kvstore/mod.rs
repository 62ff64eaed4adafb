//! The illustrative key/value state machine.
//!
//! Grounded on `original_source/raftsvr/kvstore.go`'s `Kvstore`: a map
//! behind a lock, `Propose`/`Lookup` for the write/read path, and
//! `ReadCommits` draining the commit stream to apply entries or reload
//! from a snapshot. The Go version gob-encodes `Kv{Key,Val}` proposals and
//! JSON-encodes the whole map for snapshots; this keeps JSON for both,
//! since there is no gob equivalent worth reaching for in the ecosystem
//! and `serde_json` already covers the snapshot format.

pub mod http;

use crate::driver::{Commit, NodeHandle, Proposer};
use crate::error::{NodeError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
struct Kv {
    key: String,
    val: String,
}

/// Shared map of committed key/value pairs. Cheap to clone; every clone
/// refers to the same underlying lock.
#[derive(Clone, Default)]
pub struct KvStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, key: &str) -> Option<String> {
        self.inner.read().get(key).cloned()
    }

    /// Encode a proposal for `key = val` and send it to the driver. The
    /// actual map mutation happens later, when this entry comes back
    /// through the commit stream and [`apply_commits`] applies it.
    pub async fn propose(&self, proposer: &Proposer, key: String, val: String) -> Result<()> {
        let kv = Kv { key, val };
        let data = serde_json::to_vec(&kv)?;
        proposer.propose(data).await
    }

    /// JSON snapshot of the whole map, handed to the driver as the
    /// `get_snapshot` closure's output. Mirrors `GetSnapshot`.
    pub fn snapshot(&self) -> Vec<u8> {
        serde_json::to_vec(&*self.inner.read()).expect("map of strings always encodes")
    }

    /// Replace the map wholesale from a snapshot's payload. Mirrors
    /// `RecoverFromSnapshot`.
    pub fn recover_from_snapshot(&self, data: &[u8]) -> Result<()> {
        let store: HashMap<String, String> = serde_json::from_slice(data)?;
        *self.inner.write() = store;
        Ok(())
    }

    fn apply(&self, data: &[u8]) {
        match serde_json::from_slice::<Kv>(data) {
            Ok(kv) => {
                self.inner.write().insert(kv.key, kv.val);
            }
            Err(e) => tracing::warn!(error = %e, "dropped malformed commit entry"),
        }
    }
}

/// Drain `handle`'s commit stream, applying entries to `store` and
/// reloading it from `snapshotter` whenever the sentinel fires. Runs
/// until the driver shuts down. Mirrors `ReadCommits`'s loop, except the
/// initial synchronous replay `LoadDataToMap` does before spawning the
/// background reader is not distinguished here: both happen on the same
/// stream, since `NodeDriver` already interleaves replay-completion and
/// live commits through the identical channel.
pub async fn apply_commits(
    store: KvStore,
    mut handle: NodeHandle,
    snapshotter: crate::snapshot::Snapshotter,
) {
    loop {
        match handle.next_commit().await {
            Some(Commit::Data(data)) => store.apply(&data),
            Some(Commit::LoadSnapshot) => match snapshotter.load() {
                Ok(snap) => {
                    tracing::info!(term = snap.metadata.term, index = snap.metadata.index, "loading snapshot");
                    if let Err(e) = store.recover_from_snapshot(&snap.data) {
                        tracing::error!(error = %e, "failed to recover from snapshot");
                    }
                }
                Err(NodeError::NoSnapshot) => {}
                Err(e) => tracing::error!(error = %e, "failed to load snapshot"),
            },
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_inserts_and_lookup_reads_back() {
        let store = KvStore::new();
        let data = serde_json::to_vec(&Kv { key: "a".into(), val: "1".into() }).unwrap();
        store.apply(&data);
        assert_eq!(store.lookup("a"), Some("1".to_string()));
        assert_eq!(store.lookup("missing"), None);
    }

    #[test]
    fn snapshot_then_recover_round_trips() {
        let store = KvStore::new();
        store.apply(&serde_json::to_vec(&Kv { key: "a".into(), val: "1".into() }).unwrap());
        store.apply(&serde_json::to_vec(&Kv { key: "b".into(), val: "2".into() }).unwrap());
        let snap = store.snapshot();

        let other = KvStore::new();
        other.recover_from_snapshot(&snap).unwrap();
        assert_eq!(other.lookup("a"), Some("1".to_string()));
        assert_eq!(other.lookup("b"), Some("2".to_string()));
    }

    #[test]
    fn malformed_commit_is_dropped_without_panicking() {
        let store = KvStore::new();
        store.apply(b"not json");
        assert_eq!(store.lookup("a"), None);
    }
}
