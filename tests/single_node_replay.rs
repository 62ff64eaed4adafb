// A single-node cluster that proposes one key, is torn down mid-flight,
// and on restart must have replayed that key before any new proposal is
// accepted.

use raft_node::config::NodeConfig;
use raft_node::driver::NodeDriver;
use raft_node::kvstore::{self, KvStore};
use raft_node::snapshot::Snapshotter;
use std::path::Path;
use std::time::Duration;

fn solo_config(tmp: &tempfile::TempDir) -> NodeConfig {
    let mut cfg = NodeConfig::default();
    cfg.node_name = "n1".to_string();
    cfg.self_peer = "http://127.0.0.1:19001".to_string();
    cfg.cluster = "n1=http://127.0.0.1:19001".to_string();
    cfg.wal_dir = Some(tmp.path().join("wal").to_string_lossy().into_owned());
    cfg.snap_dir = Some(tmp.path().join("snap").to_string_lossy().into_owned());
    cfg.tick_interval_ms = 5;
    cfg
}

async fn wait_for<F: Fn() -> Option<String>>(f: F, timeout: Duration) -> Option<String> {
    let start = tokio::time::Instant::now();
    loop {
        if let Some(v) = f() {
            return Some(v);
        }
        if start.elapsed() > timeout {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn propose_then_restart_replays_committed_key() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = solo_config(&tmp);

    // First incarnation: bootstrap, propose one key, wait for it to land
    // in the state machine, then drop everything without a clean
    // shutdown (simulating a crash).
    {
        let cluster = raft_node::cluster::Cluster::parse(&cfg.cluster).unwrap();
        let cluster_id = cluster.id();
        let store = KvStore::new();
        let snap_dir = cfg.snap_dir();
        let (driver, handle) =
            NodeDriver::bootstrap(cfg.clone(), cluster, cluster_id, Box::new(|| Vec::new())).unwrap();
        let proposer = handle.proposer();

        let run = tokio::spawn(driver.run());
        let apply = tokio::spawn(kvstore::apply_commits(
            store.clone(),
            handle,
            Snapshotter::new(Path::new(&snap_dir)),
        ));

        store.propose(&proposer, "k".to_string(), "v".to_string()).await.unwrap();

        let got = wait_for(|| store.lookup("k"), Duration::from_secs(5)).await;
        assert_eq!(got, Some("v".to_string()), "proposal never committed in first incarnation");

        run.abort();
        apply.abort();
    }

    // Second incarnation: reopen the same WAL/snapshot directories. The
    // replayed commit stream must deliver k->v before any new proposal.
    {
        let cluster = raft_node::cluster::Cluster::parse(&cfg.cluster).unwrap();
        let cluster_id = cluster.id();
        let store = KvStore::new();
        let snap_dir = cfg.snap_dir();
        let (driver, handle) =
            NodeDriver::bootstrap(cfg.clone(), cluster, cluster_id, Box::new(|| Vec::new())).unwrap();

        let run = tokio::spawn(driver.run());
        let apply = tokio::spawn(kvstore::apply_commits(
            store.clone(),
            handle,
            Snapshotter::new(Path::new(&snap_dir)),
        ));

        let got = wait_for(|| store.lookup("k"), Duration::from_secs(5)).await;
        assert_eq!(got, Some("v".to_string()), "replay did not restore k before any new proposal");

        run.abort();
        apply.abort();
    }
}
