//! RaftNode - peer fan-out around the consensus core
//!
//! Owns the transport and drives the network side of the protocol: vote
//! collection, log replication and heartbeats. All requests are built in a
//! short critical section over the shared core, then sent concurrently with
//! the lock released.

use std::sync::Arc;

use tokio::sync::Mutex;

use futures::stream::FuturesUnordered;
use futures::StreamExt;

use crate::transport::{Transport, TransportError};

use super::raft_core::{
    AppendEntriesArgs, AppendEntriesResult, InstallSnapshotArgs, InstallSnapshotResult, RaftCore,
    RaftState,
};
use super::raft_core::RequestVoteArgs;

/// Shared reference to RaftCore
pub type SharedCore = Arc<Mutex<RaftCore>>;

/// High-level Raft node that handles consensus operations
pub struct RaftNode<T: Transport> {
    core: SharedCore,
    transport: T,
}

impl<T: Transport> RaftNode<T> {
    /// Create a new RaftNode
    pub fn new(core: RaftCore, transport: T) -> Self {
        Self {
            core: Arc::new(Mutex::new(core)),
            transport,
        }
    }

    /// Get a shared reference to the core (for incoming RPC handling)
    pub fn shared_core(&self) -> SharedCore {
        self.core.clone()
    }

    /// Start an election
    pub async fn start_election(&self) {
        let mut core = self.core.lock().await;
        core.start_election();
    }

    /// Request votes from all peers (sends requests concurrently).
    /// Returns true if became leader.
    pub async fn request_votes(&self) -> bool {
        let (args, peers) = {
            let mut core = self.core.lock().await;

            // A single-node cluster wins with its own vote
            if core.state == RaftState::Candidate && core.has_vote_majority() {
                core.become_leader();
                return true;
            }

            let args = RequestVoteArgs {
                term: core.current_term,
                candidate_id: core.id,
                last_log_index: core.last_log_index(),
                last_log_term: core.last_log_term(),
            };
            (args, core.peers.clone())
        };

        // Send all vote requests concurrently, process as they arrive
        let mut futures: FuturesUnordered<_> = peers
            .iter()
            .map(|&peer_id| {
                let args = args.clone();
                let transport = &self.transport;
                async move { (peer_id, transport.request_vote(peer_id, args).await) }
            })
            .collect();

        while let Some((peer_id, result)) = futures.next().await {
            if let Ok(result) = result {
                let mut core = self.core.lock().await;
                if core.handle_request_vote_result(peer_id, &result) {
                    return true; // Became leader, don't wait for remaining
                }
            }
        }

        false
    }

    /// Build the AppendEntries request for one peer, carrying every entry
    /// from its next_index through `up_to_index` (or the log end).
    fn build_append_args(core: &RaftCore, peer_id: u64, up_to_index: Option<u64>) -> (AppendEntriesArgs, u64) {
        let next_idx = core.next_index.get(&peer_id).copied().unwrap_or(1);
        let prev_log_index = next_idx.saturating_sub(1);
        let prev_log_term = core.term_at(prev_log_index).unwrap_or(0);

        let entries: Vec<_> = core
            .log
            .iter()
            .filter(|e| e.index >= next_idx && up_to_index.map_or(true, |up| e.index <= up))
            .cloned()
            .collect();
        let last_entry_index = entries.last().map(|e| e.index).unwrap_or(0);

        let args = AppendEntriesArgs {
            term: core.current_term,
            leader_id: core.id,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: core.commit_index,
        };
        (args, last_entry_index)
    }

    /// Replicate the log through `entry_index` to all peers, processing
    /// responses as they arrive. Returns true once `entry_index` is
    /// committed (majority reached), false otherwise.
    pub async fn replicate_to_peers(&self, entry_index: u64) -> bool {
        let requests = {
            let mut core = self.core.lock().await;
            if core.state != RaftState::Leader {
                return false;
            }
            if core.peers.is_empty() {
                // Single-node cluster: the local append is the majority
                core.try_advance_commit();
                return core.commit_index >= entry_index;
            }
            core.peers
                .iter()
                .map(|&peer_id| {
                    let (args, last) = Self::build_append_args(&core, peer_id, Some(entry_index));
                    (peer_id, args, last)
                })
                .collect::<Vec<_>>()
        };

        // Send to all peers concurrently (lock released)
        let mut futures: FuturesUnordered<_> = requests
            .into_iter()
            .map(|(peer_id, args, last)| {
                let transport = &self.transport;
                async move { (peer_id, last, transport.append_entries(peer_id, args).await) }
            })
            .collect();

        while let Some((peer_id, last, result)) = futures.next().await {
            if let Ok(result) = result {
                let mut core = self.core.lock().await;
                core.handle_append_entries_result(peer_id, last, &result);
                if core.commit_index >= entry_index {
                    return true; // Committed, don't wait for remaining peers
                }
            }
        }

        self.core.lock().await.commit_index >= entry_index
    }

    /// Get current state
    pub async fn state(&self) -> RaftState {
        self.core.lock().await.state
    }

    /// Get commit index
    pub async fn commit_index(&self) -> u64 {
        self.core.lock().await.commit_index
    }

    /// Send a heartbeat round to all peers.
    ///
    /// Heartbeats are AppendEntries RPCs that also carry any entries the
    /// follower is missing. A follower whose next entry has been compacted
    /// away gets an InstallSnapshot instead. Returns (still_leader,
    /// success_count).
    pub async fn send_heartbeat(&self) -> (bool, usize) {
        enum Request {
            Append(AppendEntriesArgs, u64),
            Snapshot(InstallSnapshotArgs),
        }

        let requests = {
            let core = self.core.lock().await;

            if core.state != RaftState::Leader {
                return (false, 0);
            }

            let mut requests = Vec::new();
            for &peer_id in &core.peers {
                let next_idx = core.next_index.get(&peer_id).copied().unwrap_or(1);

                if next_idx <= core.snapshot_last_index {
                    // Peer needs entries we no longer retain
                    if let Some(data) = core.read_snapshot() {
                        requests.push((
                            peer_id,
                            Request::Snapshot(InstallSnapshotArgs {
                                term: core.current_term,
                                leader_id: core.id,
                                last_included_index: core.snapshot_last_index,
                                last_included_term: core.snapshot_last_term,
                                data,
                            }),
                        ));
                    }
                    // If the snapshot can't be read, skip this peer for now
                    continue;
                }

                let (args, last) = Self::build_append_args(&core, peer_id, None);
                requests.push((peer_id, Request::Append(args, last)));
            }
            requests
        };

        enum Reply {
            Append(Result<AppendEntriesResult, TransportError>, u64),
            Snapshot(Result<InstallSnapshotResult, TransportError>, u64),
        }

        let mut futures: FuturesUnordered<_> = requests
            .into_iter()
            .map(|(peer_id, request)| {
                let transport = &self.transport;
                async move {
                    match request {
                        Request::Append(args, last) => {
                            let result = transport.append_entries(peer_id, args).await;
                            (peer_id, Reply::Append(result, last))
                        }
                        Request::Snapshot(args) => {
                            let boundary = args.last_included_index;
                            let result = transport.install_snapshot(peer_id, args).await;
                            (peer_id, Reply::Snapshot(result, boundary))
                        }
                    }
                }
            })
            .collect();

        // Wait for every peer so we catch higher terms and replicate fully
        let mut success_count = 0;
        while let Some((peer_id, reply)) = futures.next().await {
            match reply {
                Reply::Append(Ok(result), last) => {
                    let mut core = self.core.lock().await;
                    core.handle_append_entries_result(peer_id, last, &result);
                    success_count += 1;
                }
                Reply::Snapshot(Ok(result), boundary) => {
                    let mut core = self.core.lock().await;
                    if result.term > core.current_term {
                        core.observe_term(result.term);
                    } else {
                        core.next_index.insert(peer_id, boundary + 1);
                        core.match_index.insert(peer_id, boundary);
                        success_count += 1;
                    }
                }
                Reply::Append(Err(_), _) | Reply::Snapshot(Err(_), _) => {
                    // Transient peer failure; retried on the next tick
                }
            }
        }

        let still_leader = self.core.lock().await.state == RaftState::Leader;
        (still_leader, success_count)
    }
}
