// Node configuration, loaded from a TOML file with sane defaults overlaid.
//
// Mirrors `DatabaseConfig`: a plain serde struct with a `Default` impl
// holding the node's tuning defaults, plus a `from_file` loader that
// falls back to defaults when the file is absent.

use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's name, as it appears in the cluster descriptor.
    pub node_name: String,
    /// This node's own advertised peer URL (e.g. `http://127.0.0.1:12379`).
    pub self_peer: String,
    /// Cluster descriptor string: `name1=url1,name2=url2,...`.
    pub cluster: String,
    /// Join an existing cluster instead of bootstrapping a new one.
    pub join: bool,

    pub wal_dir: Option<String>,
    pub snap_dir: Option<String>,

    pub tick_interval_ms: u64,
    pub election_tick: u64,
    pub heartbeat_tick: u64,
    pub max_inflight_msgs: usize,
    pub max_size_per_msg: u64,
    pub max_uncommitted_size: u64,

    pub snapshot_count: u64,
    pub catch_up_entries: u64,
    pub max_snap_files: usize,
    pub max_wal_files: usize,
    pub wal_segment_size: u64,

    pub purge_interval_secs: u64,
    pub conn_read_timeout_secs: u64,
    pub pipeline_workers: usize,
    pub pipeline_queue_depth: usize,

    /// Listen address for the K/V HTTP API, distinct from the peer URL.
    pub kv_api_addr: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: "node1".to_string(),
            self_peer: "http://127.0.0.1:12379".to_string(),
            cluster: "node1=http://127.0.0.1:12379".to_string(),
            join: false,
            wal_dir: None,
            snap_dir: None,
            tick_interval_ms: 100,
            election_tick: 10,
            heartbeat_tick: 1,
            max_inflight_msgs: 256,
            max_size_per_msg: 1024 * 1024,
            max_uncommitted_size: 1 << 30,
            snapshot_count: 10_000,
            catch_up_entries: 10_000,
            max_snap_files: 5,
            max_wal_files: 5,
            wal_segment_size: 64 * 1024 * 1024,
            purge_interval_secs: 30,
            conn_read_timeout_secs: 5,
            pipeline_workers: 4,
            pipeline_queue_depth: 4096,
            kv_api_addr: None,
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| NodeError::Config(format!("invalid config: {e}")))
    }

    pub fn wal_dir(&self) -> String {
        self.wal_dir
            .clone()
            .unwrap_or_else(|| format!("raft-{}", self.node_name))
    }

    pub fn snap_dir(&self) -> String {
        self.snap_dir
            .clone()
            .unwrap_or_else(|| format!("raft-{}-snap", self.node_name))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn conn_read_timeout(&self) -> Duration {
        Duration::from_secs(self.conn_read_timeout_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_hold_expected_tuning_numbers() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.election_tick, 10);
        assert_eq!(cfg.heartbeat_tick, 1);
        assert_eq!(cfg.max_inflight_msgs, 256);
        assert_eq!(cfg.max_size_per_msg, 1024 * 1024);
        assert_eq!(cfg.max_uncommitted_size, 1 << 30);
        assert_eq!(cfg.snapshot_count, 10_000);
        assert_eq!(cfg.catch_up_entries, 10_000);
        assert_eq!(cfg.wal_segment_size, 64 * 1024 * 1024);
    }

    #[test]
    fn wal_and_snap_dir_derive_from_node_name() {
        let mut cfg = NodeConfig::default();
        cfg.node_name = "n2".to_string();
        assert_eq!(cfg.wal_dir(), "raft-n2");
        assert_eq!(cfg.snap_dir(), "raft-n2-snap");
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let cfg = NodeConfig::from_file("/nonexistent/path/rustnode.toml").unwrap();
        assert_eq!(cfg.node_name, NodeConfig::default().node_name);
    }
}
