//! HTTP transport for Raft RPC
//!
//! Client side: one `PeerEnd` per peer, built once at startup, each with its
//! own request deadline. Server side: an axum router delegating straight
//! into the shared core.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use axum::{extract::State, routing::post, Json, Router};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::core::raft_core::{
    AppendEntriesArgs, AppendEntriesResult, InstallSnapshotArgs, InstallSnapshotResult,
    RequestVoteArgs, RequestVoteResult,
};
use crate::core::raft_node::SharedCore;

use super::{Transport, TransportError};

/// One logical connection to a peer.
struct PeerEnd {
    addr: String,
    client: reqwest::Client,
}

impl PeerEnd {
    fn new(addr: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client");
        PeerEnd { addr, client }
    }

    async fn call<A: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        args: &A,
    ) -> Result<R, TransportError> {
        let url = format!("http://{}{}", self.addr, path);
        let response = self
            .client
            .post(&url)
            .json(args)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::ConnectionFailed
                }
            })?;
        response
            .json::<R>()
            .await
            .map_err(|_| TransportError::ConnectionFailed)
    }
}

/// HTTP transport holding one client end per peer.
pub struct HttpPeerTransport {
    peers: HashMap<u64, PeerEnd>,
}

impl HttpPeerTransport {
    /// Build client ends for all peers (id -> "host:port").
    pub fn new(peers: HashMap<u64, String>, timeout: Duration) -> Self {
        let peers = peers
            .into_iter()
            .map(|(id, addr)| (id, PeerEnd::new(addr, timeout)))
            .collect();
        HttpPeerTransport { peers }
    }

    fn peer(&self, target: u64) -> Result<&PeerEnd, TransportError> {
        self.peers.get(&target).ok_or(TransportError::NodeNotFound)
    }
}

#[async_trait]
impl Transport for HttpPeerTransport {
    async fn request_vote(
        &self,
        target: u64,
        args: RequestVoteArgs,
    ) -> Result<RequestVoteResult, TransportError> {
        let result = self.peer(target)?.call("/raft/request_vote", &args).await;
        if let Err(err) = &result {
            warn!(peer = target, ?err, "request_vote failed");
        }
        result
    }

    async fn append_entries(
        &self,
        target: u64,
        args: AppendEntriesArgs,
    ) -> Result<AppendEntriesResult, TransportError> {
        let result = self.peer(target)?.call("/raft/append_entries", &args).await;
        if let Err(err) = &result {
            warn!(peer = target, ?err, "append_entries failed");
        }
        result
    }

    async fn install_snapshot(
        &self,
        target: u64,
        args: InstallSnapshotArgs,
    ) -> Result<InstallSnapshotResult, TransportError> {
        let result = self
            .peer(target)?
            .call("/raft/install_snapshot", &args)
            .await;
        if let Err(err) = &result {
            warn!(peer = target, ?err, "install_snapshot failed");
        }
        result
    }

    fn close_all(&self) {
        // reqwest clients tear down their pools on drop; nothing to flush
    }
}

/// Create an axum router for handling incoming Raft RPCs
pub fn create_raft_router(core: SharedCore) -> Router {
    Router::new()
        .route("/raft/request_vote", post(handle_request_vote))
        .route("/raft/append_entries", post(handle_append_entries))
        .route("/raft/install_snapshot", post(handle_install_snapshot))
        .with_state(core)
}

async fn handle_request_vote(
    State(core): State<SharedCore>,
    Json(args): Json<RequestVoteArgs>,
) -> Json<RequestVoteResult> {
    let mut core = core.lock().await;
    Json(core.handle_request_vote(&args))
}

async fn handle_append_entries(
    State(core): State<SharedCore>,
    Json(args): Json<AppendEntriesArgs>,
) -> Json<AppendEntriesResult> {
    let mut core = core.lock().await;
    Json(core.handle_append_entries(&args).result)
}

async fn handle_install_snapshot(
    State(core): State<SharedCore>,
    Json(args): Json<InstallSnapshotArgs>,
) -> Json<InstallSnapshotResult> {
    let mut core = core.lock().await;
    Json(core.handle_install_snapshot(&args))
}
