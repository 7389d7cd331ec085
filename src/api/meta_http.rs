//! Client HTTP API for the metadata service
//!
//! - `POST /meta/command`: submit a request (topology or catalog op)
//! - `GET  /meta/leader`: leader hint for client-side redirect
//! - `GET  /meta/status`: node status for operators

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::core::raft_core::RaftState;
use crate::core::raft_node::SharedCore;
use crate::meta::{MetaRequest, MetaResponse, MetaServer};

/// State for the client HTTP handlers
#[derive(Clone)]
pub struct ClientState {
    pub server: Arc<MetaServer>,
    pub core: SharedCore,
}

/// Response for leader query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderResponse {
    pub leader_id: Option<u64>,
    pub node_id: u64,
    pub is_leader: bool,
}

/// Response for status query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub node_id: u64,
    pub state: String,
    pub term: u64,
    pub leader_id: Option<u64>,
    pub commit_index: u64,
    pub last_applied: u64,
    pub log_length: u64,
}

/// Create an axum router for the client-facing API
pub fn create_meta_router(server: Arc<MetaServer>, core: SharedCore) -> Router {
    let state = ClientState { server, core };
    Router::new()
        .route("/meta/command", post(handle_command))
        .route("/meta/leader", get(handle_leader))
        .route("/meta/status", get(handle_status))
        .with_state(state)
}

/// Handle POST /meta/command: full propose/replicate/apply flow
async fn handle_command(
    State(state): State<ClientState>,
    Json(request): Json<MetaRequest>,
) -> Json<MetaResponse> {
    Json(state.server.submit(request).await)
}

/// Handle GET /meta/leader
async fn handle_leader(State(state): State<ClientState>) -> Json<LeaderResponse> {
    let core = state.core.lock().await;
    Json(LeaderResponse {
        leader_id: core.leader_id(),
        node_id: core.id,
        is_leader: core.state == RaftState::Leader,
    })
}

/// Handle GET /meta/status
async fn handle_status(State(state): State<ClientState>) -> Json<StatusResponse> {
    let core = state.core.lock().await;
    Json(StatusResponse {
        node_id: core.id,
        state: format!("{:?}", core.state),
        term: core.current_term,
        leader_id: core.leader_id(),
        commit_index: core.commit_index,
        last_applied: core.last_applied,
        log_length: core.log_count() as u64,
    })
}
