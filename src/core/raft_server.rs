//! RaftServer - the consensus actor loop
//!
//! Owns the election/heartbeat timers and a command channel; client-facing
//! code talks to it exclusively through a cloneable [`RaftHandle`]. This
//! keeps every externally triggered state transition funneled through one
//! task, with the shared core lock held only for short synchronous sections.

use std::pin::pin;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep_until, Duration, Instant, MissedTickBehavior};

use crate::transport::{Transport, TransportError};

use super::config::RaftConfig;
use super::raft_core::{RaftCore, RaftState};
use super::raft_node::{RaftNode, SharedCore};

/// Errors that can occur during Raft operations
#[derive(Debug, Clone, Error)]
pub enum RaftError {
    /// This node is not the leader (includes leader hint if known)
    #[error("not the leader (hint: {leader_hint:?})")]
    NotLeader { leader_hint: Option<u64> },
    /// The server loop has shut down
    #[error("raft server has shut down")]
    Shutdown,
    /// Transport error occurred
    #[error("transport error: {0:?}")]
    Transport(TransportError),
}

/// Commands sent into the server loop
enum Command {
    /// Propose a command for replication. Replies with
    /// (log index, term, is_leader) as soon as the entry is appended
    /// locally; commit is observed through the apply channel.
    Propose {
        command: Vec<u8>,
        reply: oneshot::Sender<(u64, u64, bool)>,
        /// Signalled by the proposer once its completion waiter is parked;
        /// replication holds until then so a commit cannot outrun the
        /// registration. A dropped sender unblocks immediately.
        parked: oneshot::Receiver<()>,
    },
}

/// Handle for interacting with a running RaftServer
#[derive(Clone)]
pub struct RaftHandle {
    command_tx: mpsc::Sender<Command>,
    shutdown_tx: mpsc::Sender<()>,
}

impl RaftHandle {
    /// Propose a command to the cluster. Returns immediately after the
    /// local append with (log index, term, is_leader); a non-leader node
    /// returns is_leader = false with no side effect.
    ///
    /// The caller signals `parked` once it has registered whatever waiter
    /// observes the commit; replication starts after that signal (or after
    /// the sender is dropped).
    pub async fn propose(
        &self,
        command: Vec<u8>,
        parked: oneshot::Receiver<()>,
    ) -> Result<(u64, u64, bool), RaftError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Propose {
                command,
                reply: reply_tx,
                parked,
            })
            .await
            .map_err(|_| RaftError::Shutdown)?;
        reply_rx.await.map_err(|_| RaftError::Shutdown)
    }

    /// Shutdown the RaftServer gracefully
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Raft server that owns the timers and coordinates with RaftNode
pub struct RaftServer<T: Transport> {
    node: RaftNode<T>,
    command_rx: mpsc::Receiver<Command>,
    command_tx: mpsc::Sender<Command>,
    shutdown_rx: mpsc::Receiver<()>,
    shutdown_tx: mpsc::Sender<()>,
    config: RaftConfig,
}

impl<T: Transport + 'static> RaftServer<T> {
    /// Create a new RaftServer with default config.
    /// Returns the server and shared core for RPC handling.
    pub fn new(core: RaftCore, transport: T) -> (Self, SharedCore) {
        Self::with_config(core, transport, RaftConfig::default())
    }

    /// Create a new RaftServer with custom config.
    /// Returns the server and shared core for RPC handling.
    pub fn with_config(core: RaftCore, transport: T, config: RaftConfig) -> (Self, SharedCore) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let node = RaftNode::new(core, transport);
        let shared_core = node.shared_core();
        let server = Self {
            node,
            command_rx,
            command_tx,
            shutdown_rx,
            shutdown_tx,
            config,
        };
        (server, shared_core)
    }

    /// Start the server loop and return a handle for interaction
    pub fn start(self) -> RaftHandle {
        let handle = RaftHandle {
            command_tx: self.command_tx.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        };
        tokio::spawn(self.run());
        handle
    }

    /// Main server loop
    async fn run(mut self) {
        let mut heartbeat_interval = interval(self.config.heartbeat_interval);
        // Delay behavior prevents accumulated missed ticks from starving the
        // election timeout
        heartbeat_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Fixed randomized election timeout for this server instance
        let election_timeout = self.config.random_election_timeout();

        loop {
            let election_deadline = self.get_election_deadline(election_timeout).await;
            let election_sleep = pin!(sleep_until(election_deadline));

            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    break;
                }
                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        Command::Propose { command, reply, parked } => {
                            let (index, term, is_leader) = {
                                let shared = self.node.shared_core();
                                let mut core = shared.lock().await;
                                core.propose(command)
                            };
                            let _ = reply.send((index, term, is_leader));
                            if is_leader {
                                // Wait for the proposer to park its waiter,
                                // then push the entry out right away instead
                                // of waiting for the next heartbeat tick
                                let _ = parked.await;
                                self.node.replicate_to_peers(index).await;
                            }
                        }
                    }
                }
                _ = heartbeat_interval.tick() => {
                    if self.node.state().await == RaftState::Leader {
                        // A leader's own timer must not fire an election
                        self.node.shared_core().lock().await.last_heartbeat = Instant::now();
                        self.node.send_heartbeat().await;
                    }
                }
                _ = election_sleep => {
                    let state = self.node.state().await;
                    if state != RaftState::Leader
                        && self.has_election_timed_out(election_timeout).await
                    {
                        self.node.start_election().await;
                        let became_leader = self.node.request_votes().await;
                        if became_leader {
                            // Establish leadership immediately
                            self.node.send_heartbeat().await;
                        }
                    }
                }
                else => break, // All channels closed
            }
        }
    }

    /// Election deadline derived from the core's last leader contact
    async fn get_election_deadline(&self, timeout: Duration) -> Instant {
        let core = self.node.shared_core();
        let last_heartbeat = core.lock().await.last_heartbeat;
        last_heartbeat + timeout
    }

    /// Check the deadline again right before acting on it; a heartbeat may
    /// have arrived while we slept
    async fn has_election_timed_out(&self, timeout: Duration) -> bool {
        let core = self.node.shared_core();
        let last_heartbeat = core.lock().await.last_heartbeat;
        Instant::now() >= last_heartbeat + timeout
    }

    /// Start an election (delegates to RaftNode)
    pub async fn start_election(&self) {
        self.node.start_election().await;
    }

    /// Request votes from all peers (delegates to RaftNode)
    pub async fn request_votes(&self) -> bool {
        self.node.request_votes().await
    }

    /// Get current state
    pub async fn state(&self) -> RaftState {
        self.node.state().await
    }

    /// Get commit index
    pub async fn commit_index(&self) -> u64 {
        self.node.commit_index().await
    }
}
