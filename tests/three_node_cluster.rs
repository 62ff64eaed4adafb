// Three nodes bootstrapped together must elect a leader and agree on
// proposed entries, and after the leader is killed the remaining two
// must elect a new leader and keep making progress.

use raft_node::cluster::Cluster;
use raft_node::config::NodeConfig;
use raft_node::driver::NodeDriver;
use raft_node::kvstore::{self, KvStore};
use raft_node::snapshot::Snapshotter;
use std::net::TcpListener;
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinHandle;

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

struct Node {
    store: KvStore,
    proposer: raft_node::driver::Proposer,
    run: JoinHandle<()>,
    apply: JoinHandle<()>,
}

fn spawn_node(name: &str, cluster_desc: &str, tmp: &tempfile::TempDir) -> Node {
    let parsed = Cluster::parse(cluster_desc).unwrap();
    let node_id = parsed.get(name).unwrap().id;
    let self_url = parsed.get(name).unwrap().url.clone();

    let mut cfg = NodeConfig::default();
    cfg.node_name = name.to_string();
    cfg.cluster = cluster_desc.to_string();
    cfg.self_peer = self_url;
    cfg.wal_dir = Some(tmp.path().join(format!("{name}-wal")).to_string_lossy().into_owned());
    cfg.snap_dir = Some(tmp.path().join(format!("{name}-snap")).to_string_lossy().into_owned());
    // Fast ticking so elections and heartbeats settle in well under the
    // test's wait budget.
    cfg.tick_interval_ms = 10;
    cfg.election_tick = 10;
    cfg.heartbeat_tick = 1;

    let cluster = Cluster::parse(&cfg.cluster).unwrap();
    let cluster_id = cluster.id();
    let store = KvStore::new();
    let snap_dir = cfg.snap_dir();
    let (driver, handle) =
        NodeDriver::bootstrap(cfg.clone(), cluster, cluster_id, Box::new(|| Vec::new())).unwrap();
    let proposer = handle.proposer();

    let peer_addr: std::net::SocketAddr = cfg
        .self_peer
        .trim_start_matches("http://")
        .parse()
        .unwrap();
    let router = raft_node::transport::router(
        std::sync::Arc::new(raft_node::transport::ServerState {
            local_id: node_id,
            cluster_id,
            inbound: driver.inbound_sender(),
            member_removed: std::sync::atomic::AtomicBool::new(false),
        }),
        cfg.conn_read_timeout(),
    );
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(peer_addr).await.unwrap();
        let _ = axum::serve(listener, router).await;
    });

    let run = tokio::spawn(driver.run());
    let apply = tokio::spawn(kvstore::apply_commits(
        store.clone(),
        handle,
        Snapshotter::new(Path::new(&snap_dir)),
    ));

    Node { store, proposer, run, apply }
}

async fn propose_on_all(nodes: &[Node], key: &str, val: &str) {
    for n in nodes {
        let _ = n.store.propose(&n.proposer, key.to_string(), val.to_string()).await;
    }
}

async fn wait_for_agreement(nodes: &[Node], key: &str, val: &str, timeout: Duration) -> bool {
    let start = tokio::time::Instant::now();
    loop {
        if nodes.iter().all(|n| n.store.lookup(key).as_deref() == Some(val)) {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn three_nodes_elect_a_leader_and_agree() {
    let tmp = tempfile::tempdir().unwrap();
    let ports = [free_port(), free_port(), free_port()];
    let cluster_desc = format!(
        "n1=http://127.0.0.1:{},n2=http://127.0.0.1:{},n3=http://127.0.0.1:{}",
        ports[0], ports[1], ports[2]
    );

    let mut nodes = vec![
        spawn_node("n1", &cluster_desc, &tmp),
        spawn_node("n2", &cluster_desc, &tmp),
        spawn_node("n3", &cluster_desc, &tmp),
    ];

    // Give the cluster time to hold its first election before proposing;
    // a proposal landing on a follower before any leader exists is just
    // dropped, so the repeated propose_on_all below compensates either way.
    for i in 0..20 {
        propose_on_all(&nodes, "k", "v").await;
        if wait_for_agreement(&nodes, "k", "v", Duration::from_millis(200)).await {
            break;
        }
        assert!(i < 19, "cluster never agreed on a committed key within budget");
    }

    // Kill whichever node currently holds the leader-shaped state: since
    // this crate doesn't expose raft role externally, kill n1 and confirm
    // the remaining two keep making progress regardless of who led.
    nodes[0].run.abort();
    nodes[0].apply.abort();
    let remaining: Vec<Node> = nodes.drain(1..).collect();

    for i in 0..20 {
        propose_on_all(&remaining, "k2", "v2").await;
        if wait_for_agreement(&remaining, "k2", "v2", Duration::from_millis(200)).await {
            return;
        }
        assert!(i < 19, "surviving nodes never re-elected a leader and agreed after the crash");
    }
}
