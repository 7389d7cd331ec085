//! Consensus layer: core state machine, peer fan-out, actor loop, snapshots

pub mod config;
pub mod raft_core;
pub mod raft_node;
pub mod raft_server;
pub mod snapshot;

pub use config::RaftConfig;
pub use raft_core::{ApplyMsg, RaftCore, RaftState};
pub use raft_node::SharedCore;
pub use raft_server::{RaftError, RaftHandle, RaftServer};
