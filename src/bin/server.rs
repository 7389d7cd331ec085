//! Metadata service node binary
//!
//! Runs a single node with separate ports for cluster transport and the
//! client API.
//!
//! Usage: metaraft-server --id <NODE_ID> --transport-port <PORT> --api-port <PORT> --data-dir <DIR> --peers <ID=ADDR,...> [--compact-threshold N]
//!
//! Example for a 3-node cluster:
//!   Node 1: metaraft-server --id 1 --transport-port 8001 --api-port 9001 --data-dir /tmp/meta1 --peers 2=127.0.0.1:8002,3=127.0.0.1:8003
//!   Node 2: metaraft-server --id 2 --transport-port 8002 --api-port 9002 --data-dir /tmp/meta2 --peers 1=127.0.0.1:8001,3=127.0.0.1:8003
//!   Node 3: metaraft-server --id 3 --transport-port 8003 --api-port 9003 --data-dir /tmp/meta3 --peers 1=127.0.0.1:8001,2=127.0.0.1:8002

use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use metaraft::api::create_meta_router;
use metaraft::meta::{MetaConfig, MetaServer};
use metaraft::storage::{FileEngine, KvLogStore};
use metaraft::transport::http::{create_raft_router, HttpPeerTransport};

fn parse_args() -> (u64, u16, u16, String, HashMap<u64, String>, usize) {
    let args: Vec<String> = env::args().collect();

    let mut id: Option<u64> = None;
    let mut transport_port: Option<u16> = None;
    let mut api_port: Option<u16> = None;
    let mut data_dir: Option<String> = None;
    let mut peers: HashMap<u64, String> = HashMap::new();
    let mut compact_threshold: usize = 20;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--id" => {
                id = Some(args[i + 1].parse().expect("invalid node ID"));
                i += 2;
            }
            "--transport-port" => {
                transport_port = Some(args[i + 1].parse().expect("invalid transport port"));
                i += 2;
            }
            "--api-port" => {
                api_port = Some(args[i + 1].parse().expect("invalid API port"));
                i += 2;
            }
            "--data-dir" => {
                data_dir = Some(args[i + 1].clone());
                i += 2;
            }
            "--peers" => {
                // Format: 2=127.0.0.1:8002,3=127.0.0.1:8003
                for peer_spec in args[i + 1].split(',') {
                    let parts: Vec<&str> = peer_spec.split('=').collect();
                    if parts.len() == 2 {
                        let peer_id: u64 = parts[0].parse().expect("invalid peer ID");
                        peers.insert(peer_id, parts[1].to_string());
                    }
                }
                i += 2;
            }
            "--compact-threshold" => {
                compact_threshold = args[i + 1].parse().expect("invalid compact threshold");
                i += 2;
            }
            _ => {
                eprintln!("unknown argument: {}", args[i]);
                i += 1;
            }
        }
    }

    let id = id.expect("--id is required");
    let transport_port = transport_port.expect("--transport-port is required");
    let api_port = api_port.expect("--api-port is required");
    let data_dir = data_dir.expect("--data-dir is required");

    (id, transport_port, api_port, data_dir, peers, compact_threshold)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "metaraft=info".into()),
        )
        .init();

    let (id, transport_port, api_port, data_dir, peers, compact_threshold) = parse_args();
    info!(node = id, transport_port, api_port, %data_dir, ?peers, "starting");

    // One engine for the consensus log, one for metadata rows
    let log_engine =
        FileEngine::open(format!("{}/log_{}", data_dir, id)).expect("failed to open log engine");
    let meta_engine =
        FileEngine::open(format!("{}/meta_{}", data_dir, id)).expect("failed to open meta engine");

    let peer_ids: Vec<u64> = peers.keys().copied().collect();
    let transport = HttpPeerTransport::new(peers, Duration::from_secs(5));

    let config = MetaConfig {
        compact_threshold,
        ..MetaConfig::default()
    };
    let server = MetaServer::start(
        id,
        peer_ids,
        Box::new(KvLogStore::new(Arc::new(log_engine))),
        Arc::new(meta_engine),
        transport,
        config,
    )
    .await;

    let raft_router = create_raft_router(server.shared_core());
    let meta_router = create_meta_router(server.clone(), server.shared_core());

    // Cluster transport (consensus RPCs)
    let transport_addr: SocketAddr = format!("0.0.0.0:{}", transport_port).parse().unwrap();
    let transport_listener = tokio::net::TcpListener::bind(transport_addr)
        .await
        .expect("failed to bind transport port");
    info!(node = id, %transport_addr, "transport listening");
    tokio::spawn(async move {
        axum::serve(transport_listener, raft_router).await.unwrap();
    });

    // Client API
    let api_addr: SocketAddr = format!("0.0.0.0:{}", api_port).parse().unwrap();
    let api_listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .expect("failed to bind API port");
    info!(node = id, %api_addr, "client API listening");
    axum::serve(api_listener, meta_router).await.unwrap();
}
