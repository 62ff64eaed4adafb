// Node binary entry point.
//
// Wires a `NodeConfig` + `Cluster` descriptor into a running `NodeDriver`,
// spawns the illustrative `kvstore` state machine against its commit
// stream, and mounts the peer-transport and K/V HTTP routers on separate
// listeners. Grounded on `original_source/main.go`'s wiring order
// (newRaftNode -> start kvstore -> serve HTTP) and the usual
// `#[tokio::main]` + `tracing_subscriber::fmt()` startup convention.

use raft_node::cluster::Cluster;
use raft_node::config::NodeConfig;
use raft_node::driver::NodeDriver;
use raft_node::error::{NodeError, Result};
use raft_node::kvstore::{self, KvStore};
use raft_node::snapshot::Snapshotter;
use raft_node::transport::{self, ServerState};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).with_level(true).init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "rustnode.toml".to_string());
    let config = NodeConfig::from_file(&config_path)?;

    let cluster = Cluster::parse(&config.cluster)?;
    let cluster_id = cluster.id();
    let node = cluster
        .get(&config.node_name)
        .ok_or_else(|| NodeError::Config(format!("node {:?} not in cluster descriptor", config.node_name)))?;
    let node_id = node.id;

    tracing::info!(
        node = %config.node_name,
        id = %format_args!("{node_id:#x}"),
        cluster = %format_args!("{cluster_id:#x}"),
        "starting node"
    );

    let store = KvStore::new();
    let get_snapshot = {
        let store = store.clone();
        Box::new(move || store.snapshot())
    };

    let snap_dir_for_kv = config.snap_dir();
    let read_timeout = config.conn_read_timeout();
    let (driver, handle) = NodeDriver::bootstrap(config.clone(), cluster, cluster_id, get_snapshot)?;
    let proposer = handle.proposer();
    let inbound = driver.inbound_sender();

    let raft_server_state = Arc::new(ServerState {
        local_id: node_id,
        cluster_id,
        inbound,
        member_removed: AtomicBool::new(false),
    });

    let peer_addr = bind_addr(&config.self_peer)?;
    let raft_router = transport::router(raft_server_state, read_timeout);
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(peer_addr).await.expect("bind peer listener");
        if let Err(e) = axum::serve(listener, raft_router).await {
            tracing::error!(error = %e, "peer transport server stopped");
        }
    });

    if let Some(kv_api_addr) = config.kv_api_addr {
        let kv_addr: SocketAddr =
            kv_api_addr.parse().map_err(|e| NodeError::Config(format!("invalid kv_api_addr: {e}")))?;
        let kv_state = Arc::new(kvstore::http::KvApiState { store: store.clone(), proposer });
        let kv_router = kvstore::http::router(kv_state, read_timeout);
        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(kv_addr).await.expect("bind kv api listener");
            if let Err(e) = axum::serve(listener, kv_router).await {
                tracing::error!(error = %e, "kv api server stopped");
            }
        });
    }

    // `apply_commits` drains both the commit stream and, implicitly, the
    // driver's lifetime: once `driver.run()` returns (fatal error or
    // removal from the cluster) its commit sender drops, closing the
    // stream this loop reads from.
    tokio::spawn(kvstore::apply_commits(store, handle, Snapshotter::new(Path::new(&snap_dir_for_kv))));

    driver.run().await;
    Ok(())
}

/// Strip the scheme off an advertised peer URL and parse the remainder as
/// the local socket address to bind, so the listener and the URL other
/// nodes dial agree by construction.
fn bind_addr(url: &str) -> Result<SocketAddr> {
    let without_scheme = url.trim_start_matches("https://").trim_start_matches("http://");
    without_scheme
        .parse()
        .map_err(|e| NodeError::Config(format!("self_peer {url:?} is not host:port: {e}")))
}
