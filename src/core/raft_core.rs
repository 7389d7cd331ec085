//! Raft consensus core
//!
//! Implements the consensus state machine described in "In Search of an
//! Understandable Consensus Algorithm" (Ongaro, Ousterhout): role
//! transitions, term/vote bookkeeping, log replication with conflict-hint
//! backtracking, commit-index advancement, and snapshot install/compaction.
//!
//! The core is synchronous and transport-agnostic. Committed entries are not
//! applied here; they are emitted as [`ApplyMsg`] values into a channel whose
//! single consumer (the apply pipeline) owns the state machine. Callers wrap
//! the core in `Arc<Mutex<..>>` so that vote handling, append handling,
//! snapshot handling, proposals and election timeouts never run concurrently
//! against the shared state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::storage::{LogStore, StorageError};

use super::snapshot::{Snapshot, SnapshotMetadata};

/// Raft node states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftState {
    /// Follower: passive state, receives updates from leader
    Follower,
    /// Candidate: actively seeking votes to become leader
    Candidate,
    /// Leader: handles all client proposals and replicates the log
    Leader,
}

/// A single log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Term when entry was received by leader
    pub term: u64,
    /// Index in the log (1-indexed, contiguous within the retained log)
    pub index: u64,
    /// Opaque command bytes for the state machine. Empty bytes mark the
    /// no-op entry a fresh leader appends to commit prior-term entries.
    pub command: Vec<u8>,
}

/// Notification handed to the apply pipeline, strictly in increasing index
/// order and exactly once per committed index.
#[derive(Debug, Clone)]
pub enum ApplyMsg {
    /// A command committed at `index`.
    Command {
        index: u64,
        term: u64,
        command: Vec<u8>,
    },
    /// A snapshot delivered by the leader; the consumer decides via
    /// `cond_install_snapshot` whether it is still current.
    Snapshot { term: u64, index: u64, data: Vec<u8> },
}

/// Sender half of the apply channel owned by the core.
pub type ApplySender = mpsc::UnboundedSender<ApplyMsg>;

/// RequestVote RPC arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    /// Candidate's term
    pub term: u64,
    /// Candidate requesting vote
    pub candidate_id: u64,
    /// Index of candidate's last log entry
    pub last_log_index: u64,
    /// Term of candidate's last log entry
    pub last_log_term: u64,
}

/// RequestVote RPC results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResult {
    /// Current term, for candidate to update itself
    pub term: u64,
    /// True means candidate received vote
    pub vote_granted: bool,
}

/// AppendEntries RPC arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    /// Leader's term
    pub term: u64,
    /// Leader's ID
    pub leader_id: u64,
    /// Index of log entry immediately preceding new ones
    pub prev_log_index: u64,
    /// Term of prev_log_index entry
    pub prev_log_term: u64,
    /// Log entries to store (empty for heartbeat)
    pub entries: Vec<LogEntry>,
    /// Leader's commit_index
    pub leader_commit: u64,
}

/// AppendEntries RPC results
///
/// On rejection the follower returns conflict hints so the leader can jump
/// its `next_index` backward in one exchange instead of decrementing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResult {
    /// Current term, for leader to update itself
    pub term: u64,
    /// True if follower contained entry matching prev_log_index and prev_log_term
    pub success: bool,
    /// On mismatch: the first index the leader should retry from
    pub conflict_index: Option<u64>,
    /// On term mismatch at prev_log_index: the conflicting term
    pub conflict_term: Option<u64>,
}

impl AppendEntriesResult {
    fn ok(term: u64) -> Self {
        AppendEntriesResult {
            term,
            success: true,
            conflict_index: None,
            conflict_term: None,
        }
    }

    fn rejected(term: u64, conflict_index: Option<u64>, conflict_term: Option<u64>) -> Self {
        AppendEntriesResult {
            term,
            success: false,
            conflict_index,
            conflict_term,
        }
    }
}

/// Result of handling an AppendEntries RPC
#[derive(Debug, Clone)]
pub struct HandleAppendEntriesOutput {
    /// The response to send back to the leader
    pub result: AppendEntriesResult,
    /// Leader ID if we recognized a valid leader
    pub leader_id: Option<u64>,
}

/// InstallSnapshot RPC arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotArgs {
    /// Leader's term
    pub term: u64,
    /// Leader's ID
    pub leader_id: u64,
    /// Last log index included in snapshot
    pub last_included_index: u64,
    /// Term of last included entry
    pub last_included_term: u64,
    /// Snapshot data
    pub data: Vec<u8>,
}

/// InstallSnapshot RPC results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotResult {
    /// Current term, for leader to update itself
    pub term: u64,
}

/// Core Raft state machine (sync, transport-agnostic)
pub struct RaftCore {
    // Durable state backend
    storage: Box<dyn LogStore>,
    // Committed entries and snapshot installs flow out through this channel
    apply_tx: ApplySender,

    // Persistent state on all servers (updated on stable storage before
    // responding to RPCs; cached in memory for fast access)
    /// Latest term server has seen (initialized to 0, increases monotonically)
    pub current_term: u64,
    /// Candidate ID that received vote in current term (or None if none)
    pub voted_for: Option<u64>,
    /// Retained log entries; log[0] is the entry at snapshot_last_index + 1
    pub log: Vec<LogEntry>,
    /// Last log index included in snapshot (0 if no snapshot)
    pub snapshot_last_index: u64,
    /// Term of the last log entry included in snapshot (0 if no snapshot)
    pub snapshot_last_term: u64,

    // Volatile state on all servers
    /// Index of highest log entry known to be committed
    pub commit_index: u64,
    /// Index of highest log entry handed to the apply channel
    pub last_applied: u64,

    // Volatile state on leaders (reinitialized after election)
    /// For each peer, index of the next log entry to send
    pub next_index: HashMap<u64, u64>,
    /// For each peer, index of the highest entry known to be replicated
    pub match_index: HashMap<u64, u64>,

    // Node-specific state
    /// Unique identifier for this node
    pub id: u64,
    /// Current state of this node
    pub state: RaftState,
    /// IDs of other nodes in the cluster
    pub peers: Vec<u64>,
    /// Peers that have granted votes in the current election
    votes_received: Vec<u64>,
    /// Current known leader (updated when receiving valid AppendEntries)
    pub current_leader: Option<u64>,
    /// Last time we received a valid heartbeat from leader
    pub last_heartbeat: Instant,
}

impl RaftCore {
    /// Create a new Raft core with the given storage backend, restoring
    /// persisted term/vote/log and the snapshot boundary. The state machine
    /// itself is restored by the owning application via [`Self::read_snapshot`].
    pub fn new(id: u64, peers: Vec<u64>, storage: Box<dyn LogStore>, apply_tx: ApplySender) -> Self {
        let current_term = storage.load_term().expect("failed to load term from storage");
        let voted_for = storage
            .load_voted_for()
            .expect("failed to load voted_for from storage");
        let log = storage.load_log().expect("failed to load log from storage");

        let (snapshot_last_index, snapshot_last_term) = match storage.load_snapshot() {
            Ok(Some(snapshot)) => (
                snapshot.metadata.last_included_index,
                snapshot.metadata.last_included_term,
            ),
            Ok(None) => (0, 0),
            Err(e) => panic!("failed to load snapshot from storage: {}", e),
        };

        // Everything inside the snapshot is committed and applied
        let commit_index = snapshot_last_index;
        let last_applied = snapshot_last_index;

        RaftCore {
            storage,
            apply_tx,
            current_term,
            voted_for,
            log,
            snapshot_last_index,
            snapshot_last_term,
            commit_index,
            last_applied,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            id,
            state: RaftState::Follower,
            peers,
            votes_received: Vec::new(),
            current_leader: None,
            last_heartbeat: Instant::now(),
        }
    }

    // === Persistence helpers ===

    /// Update current_term and persist to storage
    fn set_term(&mut self, term: u64) {
        self.current_term = term;
        self.storage.save_term(term).expect("failed to persist term");
    }

    /// Update voted_for and persist to storage
    fn set_voted_for(&mut self, voted_for: Option<u64>) {
        self.voted_for = voted_for;
        self.storage
            .save_voted_for(voted_for)
            .expect("failed to persist voted_for");
    }

    /// Update term and voted_for together (common pattern when discovering a
    /// higher term)
    fn update_term(&mut self, new_term: u64) {
        self.set_term(new_term);
        self.set_voted_for(None);
    }

    /// Append a single entry to log and persist
    fn persist_log_entry(&mut self, entry: LogEntry) {
        self.storage
            .append_entries(std::slice::from_ref(&entry))
            .expect("failed to persist log entry");
        self.log.push(entry);
    }

    /// Truncate log from index (inclusive) and persist
    fn persist_truncate_from(&mut self, from_index: u64) {
        let pos = from_index.saturating_sub(self.snapshot_last_index + 1) as usize;
        if pos < self.log.len() {
            self.storage
                .truncate_from(from_index)
                .expect("failed to truncate log");
            self.log.truncate(pos);
        }
    }

    // === Log inspection ===

    /// Get the last log index (returns snapshot_last_index if log is empty)
    pub fn last_log_index(&self) -> u64 {
        match self.log.last() {
            Some(entry) => entry.index,
            None => self.snapshot_last_index,
        }
    }

    /// Get the term of the last log entry (returns snapshot_last_term if log
    /// is empty)
    pub fn last_log_term(&self) -> u64 {
        match self.log.last() {
            Some(entry) => entry.term,
            None => self.snapshot_last_term,
        }
    }

    /// Get a log entry by its index, accounting for the snapshot offset.
    /// Returns None if the entry is inside the snapshot or beyond the log.
    pub(crate) fn get_log_entry(&self, index: u64) -> Option<&LogEntry> {
        if index <= self.snapshot_last_index {
            None
        } else {
            let offset = (index - self.snapshot_last_index - 1) as usize;
            self.log.get(offset)
        }
    }

    /// Term of the entry at `index`, if known. Index 0 and the snapshot
    /// boundary resolve without touching the log.
    pub(crate) fn term_at(&self, index: u64) -> Option<u64> {
        if index == 0 {
            Some(0)
        } else if index == self.snapshot_last_index {
            Some(self.snapshot_last_term)
        } else if index < self.snapshot_last_index {
            None
        } else {
            self.get_log_entry(index).map(|e| e.term)
        }
    }

    /// Number of retained (non-snapshotted) log entries. The owning
    /// application uses this to decide when to trigger compaction.
    pub fn log_count(&self) -> usize {
        self.log.len()
    }

    /// Best-known current leader, for client redirect hints. May be stale.
    pub fn leader_id(&self) -> Option<u64> {
        self.current_leader
    }

    fn majority(&self) -> usize {
        (1 + self.peers.len()) / 2 + 1
    }

    /// Check if candidate's log is at least as up-to-date as ours:
    /// higher last term wins, same last term compares last index.
    pub fn is_log_up_to_date(&self, candidate_last_log_term: u64, candidate_last_log_index: u64) -> bool {
        let my_last_term = self.last_log_term();
        let my_last_index = self.last_log_index();

        candidate_last_log_term > my_last_term
            || (candidate_last_log_term == my_last_term && candidate_last_log_index >= my_last_index)
    }

    /// Step down if a peer reported a strictly greater term.
    pub fn observe_term(&mut self, term: u64) {
        if term > self.current_term {
            let old_state = self.state;
            self.update_term(term);
            self.state = RaftState::Follower;
            if old_state != RaftState::Follower {
                info!(node = self.id, term, ?old_state, "stepped down to follower");
            }
        }
    }

    // === RPC handlers ===

    /// Handle RequestVote RPC
    pub fn handle_request_vote(&mut self, vote_req: &RequestVoteArgs) -> RequestVoteResult {
        // Decline requests with stale term immediately
        if vote_req.term < self.current_term {
            return RequestVoteResult {
                term: self.current_term,
                vote_granted: false,
            };
        }

        self.observe_term(vote_req.term);

        // One vote per term: decline if already committed to another candidate
        if self.voted_for.is_some() && self.voted_for != Some(vote_req.candidate_id) {
            return RequestVoteResult {
                term: self.current_term,
                vote_granted: false,
            };
        }

        if !self.is_log_up_to_date(vote_req.last_log_term, vote_req.last_log_index) {
            return RequestVoteResult {
                term: self.current_term,
                vote_granted: false,
            };
        }

        self.set_voted_for(Some(vote_req.candidate_id));
        debug!(node = self.id, candidate = vote_req.candidate_id, term = self.current_term, "vote granted");

        RequestVoteResult {
            term: self.current_term,
            vote_granted: true,
        }
    }

    /// Handle AppendEntries RPC (heartbeat or log replication)
    pub fn handle_append_entries(&mut self, req: &AppendEntriesArgs) -> HandleAppendEntriesOutput {
        self.observe_term(req.term);

        if req.term < self.current_term {
            // Stale leader; do not reset the election timer
            return HandleAppendEntriesOutput {
                result: AppendEntriesResult::rejected(self.current_term, None, None),
                leader_id: None,
            };
        }

        // Valid contact from the current-term leader
        self.state = RaftState::Follower;
        self.current_leader = Some(req.leader_id);
        self.last_heartbeat = Instant::now();
        let leader_id = Some(req.leader_id);

        if req.prev_log_index < self.snapshot_last_index {
            // The leader is replaying a prefix we already compacted away;
            // point it at the first index past our snapshot boundary.
            return HandleAppendEntriesOutput {
                result: AppendEntriesResult::rejected(
                    self.current_term,
                    Some(self.snapshot_last_index + 1),
                    None,
                ),
                leader_id,
            };
        }

        if req.prev_log_index > self.last_log_index() {
            // Our log is too short to contain prev_log_index
            return HandleAppendEntriesOutput {
                result: AppendEntriesResult::rejected(
                    self.current_term,
                    Some(self.last_log_index() + 1),
                    None,
                ),
                leader_id,
            };
        }

        match self.term_at(req.prev_log_index) {
            Some(term) if term == req.prev_log_term => {}
            Some(conflicting_term) => {
                // Same index, different term: report the conflicting term and
                // its first index so the leader can skip the whole run.
                let first_index = self
                    .log
                    .iter()
                    .find(|e| e.term == conflicting_term)
                    .map(|e| e.index)
                    .unwrap_or(self.snapshot_last_index + 1);
                return HandleAppendEntriesOutput {
                    result: AppendEntriesResult::rejected(
                        self.current_term,
                        Some(first_index),
                        Some(conflicting_term),
                    ),
                    leader_id,
                };
            }
            None => {
                return HandleAppendEntriesOutput {
                    result: AppendEntriesResult::rejected(
                        self.current_term,
                        Some(self.snapshot_last_index + 1),
                        None,
                    ),
                    leader_id,
                };
            }
        }

        self.store_entries(&req.entries);

        if req.leader_commit > self.commit_index {
            let last_new_index = req
                .entries
                .last()
                .map(|e| e.index)
                .unwrap_or_else(|| self.last_log_index());
            self.commit_index = std::cmp::min(req.leader_commit, last_new_index);
            self.emit_committed_entries();
        }

        HandleAppendEntriesOutput {
            result: AppendEntriesResult::ok(self.current_term),
            leader_id,
        }
    }

    /// Store entries from AppendEntries, truncating any conflicting tail.
    /// Idempotent for retransmissions.
    fn store_entries(&mut self, entries: &[LogEntry]) {
        for entry in entries {
            // Skip entries already covered by our snapshot
            if entry.index <= self.snapshot_last_index {
                continue;
            }

            let pos = (entry.index - self.snapshot_last_index - 1) as usize;
            if pos < self.log.len() {
                if self.log[pos].term != entry.term {
                    // Conflict: delete this entry and everything after it
                    self.persist_truncate_from(entry.index);
                    self.persist_log_entry(entry.clone());
                    debug!(node = self.id, index = entry.index, term = entry.term, "replaced conflicting entry");
                }
                // Terms match: entry already present, skip
            } else {
                self.persist_log_entry(entry.clone());
                debug!(node = self.id, index = entry.index, term = entry.term, "appended replicated entry");
            }
        }
    }

    /// Handle InstallSnapshot RPC.
    ///
    /// Term bookkeeping happens here; the actual state replacement is
    /// deferred to `cond_install_snapshot` once the apply pipeline sees the
    /// snapshot message, which keeps the apply order intact.
    pub fn handle_install_snapshot(&mut self, args: &InstallSnapshotArgs) -> InstallSnapshotResult {
        if args.term < self.current_term {
            return InstallSnapshotResult {
                term: self.current_term,
            };
        }

        self.observe_term(args.term);
        self.state = RaftState::Follower;
        self.current_leader = Some(args.leader_id);
        self.last_heartbeat = Instant::now();

        // Ignore snapshots that do not advance our committed state
        if args.last_included_index <= self.commit_index {
            return InstallSnapshotResult {
                term: self.current_term,
            };
        }

        let _ = self.apply_tx.send(ApplyMsg::Snapshot {
            term: args.last_included_term,
            index: args.last_included_index,
            data: args.data.clone(),
        });

        InstallSnapshotResult {
            term: self.current_term,
        }
    }

    /// Conditionally adopt a snapshot delivered through the apply channel.
    /// Returns false if local state has already moved past it; true once the
    /// log prefix has been replaced and the boundary persisted.
    pub fn cond_install_snapshot(
        &mut self,
        last_included_term: u64,
        last_included_index: u64,
        data: &[u8],
    ) -> bool {
        if last_included_index <= self.commit_index {
            debug!(
                node = self.id,
                snapshot_index = last_included_index,
                commit_index = self.commit_index,
                "rejecting stale snapshot"
            );
            return false;
        }

        let keeps_suffix = self.term_at(last_included_index) == Some(last_included_term);

        let snapshot = Snapshot {
            metadata: SnapshotMetadata {
                last_included_index,
                last_included_term,
            },
            data: data.to_vec(),
        };
        if let Err(err) = self.storage.save_snapshot(&snapshot) {
            warn!(node = self.id, %err, "failed to persist installed snapshot");
            return false;
        }

        if keeps_suffix {
            // Our log continues past the snapshot point; keep the suffix
            self.log.retain(|e| e.index > last_included_index);
            if let Err(err) = self.storage.compact_until(last_included_index + 1) {
                warn!(node = self.id, %err, "failed to compact log after snapshot");
            }
        } else {
            self.log.clear();
            if let Err(err) = self.storage.truncate_from(0) {
                warn!(node = self.id, %err, "failed to clear log after snapshot");
            }
        }

        self.snapshot_last_index = last_included_index;
        self.snapshot_last_term = last_included_term;
        self.commit_index = last_included_index;
        self.last_applied = last_included_index;

        info!(node = self.id, index = last_included_index, term = last_included_term, "installed snapshot");
        true
    }

    /// Application-triggered compaction: the apply pipeline has applied
    /// through `index` and hands us the state machine's snapshot bytes.
    /// Persists the new boundary durably before returning.
    pub fn snapshot(&mut self, index: u64, data: &[u8]) -> Result<(), StorageError> {
        if index <= self.snapshot_last_index {
            return Ok(());
        }
        if index > self.last_applied {
            warn!(
                node = self.id,
                index,
                last_applied = self.last_applied,
                "refusing to snapshot past the applied prefix"
            );
            return Ok(());
        }

        let term = self
            .term_at(index)
            .ok_or_else(|| StorageError::Corruption(format!("no entry at snapshot index {}", index)))?;

        let snapshot = Snapshot {
            metadata: SnapshotMetadata {
                last_included_index: index,
                last_included_term: term,
            },
            data: data.to_vec(),
        };
        self.storage.save_snapshot(&snapshot)?;
        self.storage.compact_until(index + 1)?;

        self.log.retain(|e| e.index > index);
        self.snapshot_last_index = index;
        self.snapshot_last_term = term;

        info!(node = self.id, index, term, "log compacted to snapshot");
        Ok(())
    }

    /// Last persisted snapshot blob, if any, for startup restore.
    pub fn read_snapshot(&self) -> Option<Vec<u8>> {
        match self.storage.load_snapshot() {
            Ok(snapshot) => snapshot.map(|s| s.data),
            Err(err) => {
                warn!(node = self.id, %err, "failed to read snapshot");
                None
            }
        }
    }

    // === Elections ===

    /// Start a new election (called when election timeout elapses)
    pub fn start_election(&mut self) {
        self.set_term(self.current_term + 1);
        self.state = RaftState::Candidate;
        info!(node = self.id, term = self.current_term, "became candidate");

        // We are challenging whoever we thought was leader
        self.current_leader = None;

        // Vote for self and persist
        self.set_voted_for(Some(self.id));
        self.votes_received.clear();
        self.votes_received.push(self.id);

        // Reset election timer so we don't immediately time out again
        self.last_heartbeat = Instant::now();
    }

    /// True once the current candidacy has collected a strict majority
    /// (single-node clusters win instantly with their own vote).
    pub fn has_vote_majority(&self) -> bool {
        self.votes_received.len() >= self.majority()
    }

    /// Become leader (called after receiving a majority of votes)
    pub fn become_leader(&mut self) {
        self.state = RaftState::Leader;
        self.current_leader = Some(self.id);
        self.last_heartbeat = Instant::now();
        info!(node = self.id, term = self.current_term, "became leader");

        // Reinitialize replication cursors BEFORE appending the no-op so the
        // first heartbeat carries it
        let last_index = self.last_log_index();
        for peer_id in &self.peers {
            self.next_index.insert(*peer_id, last_index + 1);
            self.match_index.insert(*peer_id, 0);
        }

        // Empty no-op entry: committing it commits all prior-term entries
        // (leaders may only count replicas for current-term entries)
        let noop = LogEntry {
            term: self.current_term,
            index: self.last_log_index() + 1,
            command: Vec::new(),
        };
        self.persist_log_entry(noop);
    }

    /// Append a client command to the local log if this node is leader.
    /// Returns (log index, term, is_leader); does not wait for commit.
    pub fn propose(&mut self, command: Vec<u8>) -> (u64, u64, bool) {
        if self.state != RaftState::Leader {
            return (0, self.current_term, false);
        }

        let index = self.last_log_index() + 1;
        let term = self.current_term;
        self.persist_log_entry(LogEntry {
            term,
            index,
            command,
        });
        debug!(node = self.id, index, term, "proposed entry");
        (index, term, true)
    }

    /// Handle a RequestVote result (called by candidate).
    /// Returns true if this node became leader as a result.
    pub fn handle_request_vote_result(&mut self, peer_id: u64, result: &RequestVoteResult) -> bool {
        self.observe_term(result.term);

        // If we're no longer a candidate (term moved on), we can't win
        if self.state != RaftState::Candidate {
            return false;
        }
        // A response from an earlier candidacy must not count here
        if result.term < self.current_term {
            return false;
        }

        if result.vote_granted && !self.votes_received.contains(&peer_id) {
            self.votes_received.push(peer_id);
        }

        if self.has_vote_majority() {
            self.become_leader();
            return true;
        }
        false
    }

    /// Handle an AppendEntries result (called by leader).
    /// `last_sent_index` is the index of the last entry carried by the
    /// request (0 for an empty heartbeat). Returns the new commit index if
    /// this response advanced it.
    pub fn handle_append_entries_result(
        &mut self,
        peer_id: u64,
        last_sent_index: u64,
        result: &AppendEntriesResult,
    ) -> Option<u64> {
        self.observe_term(result.term);

        if self.state != RaftState::Leader {
            return None;
        }

        if result.success {
            if last_sent_index > 0 {
                let current_match = self.match_index.get(&peer_id).copied().unwrap_or(0);
                if last_sent_index > current_match {
                    self.match_index.insert(peer_id, last_sent_index);
                }
                self.next_index.insert(peer_id, last_sent_index + 1);
            }
            return self.advance_leader_commit();
        }

        // Rejected: jump next_index using the follower's conflict hints
        let next = if let Some(conflict_term) = result.conflict_term {
            // Prefer the index right after our last entry of the conflicting
            // term; fall back to the follower's first index of that term
            match self.log.iter().rev().find(|e| e.term == conflict_term) {
                Some(entry) => entry.index + 1,
                None => result.conflict_index.unwrap_or(1),
            }
        } else if let Some(conflict_index) = result.conflict_index {
            conflict_index
        } else {
            self.next_index
                .get(&peer_id)
                .copied()
                .unwrap_or(1)
                .saturating_sub(1)
        };
        self.next_index.insert(peer_id, next.max(1));
        None
    }

    /// Re-evaluate the leader commit point (used on the single-node path,
    /// where no AppendEntries responses ever arrive).
    pub(crate) fn try_advance_commit(&mut self) -> Option<u64> {
        if self.state != RaftState::Leader {
            return None;
        }
        self.advance_leader_commit()
    }

    /// Advance commit_index to the highest current-term entry replicated on
    /// a majority, then emit newly committed entries.
    fn advance_leader_commit(&mut self) -> Option<u64> {
        let mut advanced = None;
        for n in (self.commit_index + 1)..=self.last_log_index() {
            // Only current-term entries are committed by counting replicas;
            // earlier terms commit transitively
            if self.term_at(n) != Some(self.current_term) {
                continue;
            }
            let replicas = 1 + self
                .match_index
                .values()
                .filter(|&&m| m >= n)
                .count();
            if replicas >= self.majority() {
                self.commit_index = n;
                advanced = Some(n);
            }
        }
        if let Some(n) = advanced {
            debug!(node = self.id, commit_index = n, "advanced commit index");
            self.emit_committed_entries();
        }
        advanced
    }

    /// Push every newly committed entry into the apply channel, in index
    /// order, exactly once each.
    fn emit_committed_entries(&mut self) {
        if self.last_applied < self.snapshot_last_index {
            self.last_applied = self.snapshot_last_index;
        }
        while self.last_applied < self.commit_index {
            self.last_applied += 1;
            let Some(entry) = self.get_log_entry(self.last_applied) else {
                // Covered by a snapshot installed meanwhile
                continue;
            };
            let msg = ApplyMsg::Command {
                index: entry.index,
                term: entry.term,
                command: entry.command.clone(),
            };
            // A closed channel means the apply pipeline has shut down;
            // nothing to notify anymore
            let _ = self.apply_tx.send(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryLogStore;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn new_test_core(id: u64, peers: Vec<u64>) -> (RaftCore, UnboundedReceiver<ApplyMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RaftCore::new(id, peers, Box::new(MemoryLogStore::new()), tx), rx)
    }

    fn cmd(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    fn entry(index: u64, term: u64, command: &str) -> LogEntry {
        LogEntry {
            term,
            index,
            command: cmd(command),
        }
    }

    fn drain(rx: &mut UnboundedReceiver<ApplyMsg>) -> Vec<ApplyMsg> {
        let mut msgs = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    #[tokio::test]
    async fn test_new_node() {
        let (node, _rx) = new_test_core(1, vec![2, 3]);
        assert_eq!(node.id, 1);
        assert_eq!(node.current_term, 0);
        assert_eq!(node.state, RaftState::Follower);
        assert_eq!(node.log.len(), 0);
        assert_eq!(node.leader_id(), None);
    }

    #[tokio::test]
    async fn test_election() {
        let (mut node, _rx) = new_test_core(1, vec![2, 3]);
        node.start_election();
        assert_eq!(node.state, RaftState::Candidate);
        assert_eq!(node.current_term, 1);
        assert_eq!(node.voted_for, Some(1));
    }

    #[tokio::test]
    async fn test_single_node_wins_with_own_vote() {
        let (mut node, _rx) = new_test_core(1, vec![]);
        node.start_election();
        assert!(node.has_vote_majority());
    }

    #[tokio::test]
    async fn test_request_vote_granted() {
        let (mut node, _rx) = new_test_core(1, vec![2, 3]);
        let args = RequestVoteArgs {
            term: 1,
            candidate_id: 2,
            last_log_index: 0,
            last_log_term: 0,
        };
        let result = node.handle_request_vote(&args);
        assert!(result.vote_granted);
        assert_eq!(node.voted_for, Some(2));
    }

    #[tokio::test]
    async fn test_vote_denied_lower_term() {
        let (mut node, _rx) = new_test_core(1, vec![2, 3]);
        node.current_term = 5;

        let args = RequestVoteArgs {
            term: 3,
            candidate_id: 2,
            last_log_index: 0,
            last_log_term: 0,
        };
        let result = node.handle_request_vote(&args);

        assert!(!result.vote_granted);
        assert_eq!(result.term, 5);
        assert_eq!(node.voted_for, None);
    }

    #[tokio::test]
    async fn test_vote_denied_already_voted_for_another() {
        let (mut node, _rx) = new_test_core(1, vec![2, 3]);
        node.current_term = 1;
        node.voted_for = Some(2);

        let args = RequestVoteArgs {
            term: 1,
            candidate_id: 3,
            last_log_index: 0,
            last_log_term: 0,
        };
        let result = node.handle_request_vote(&args);

        assert!(!result.vote_granted);
        assert_eq!(node.voted_for, Some(2));
    }

    #[tokio::test]
    async fn test_vote_granted_to_same_candidate_again() {
        let (mut node, _rx) = new_test_core(1, vec![2, 3]);
        node.current_term = 1;
        node.voted_for = Some(2);

        let args = RequestVoteArgs {
            term: 1,
            candidate_id: 2,
            last_log_index: 0,
            last_log_term: 0,
        };
        let result = node.handle_request_vote(&args);

        assert!(result.vote_granted);
    }

    #[tokio::test]
    async fn test_vote_denied_candidate_log_behind() {
        let (mut node, _rx) = new_test_core(1, vec![2, 3]);
        node.log.push(entry(1, 3, "a"));

        // Candidate's last entry has an older term
        let args = RequestVoteArgs {
            term: 4,
            candidate_id: 2,
            last_log_index: 1,
            last_log_term: 2,
        };
        let result = node.handle_request_vote(&args);

        assert!(!result.vote_granted);
        // Term still updates on the higher-term request
        assert_eq!(node.current_term, 4);
    }

    #[tokio::test]
    async fn test_vote_denied_candidate_log_shorter() {
        let (mut node, _rx) = new_test_core(1, vec![2, 3]);
        node.log.push(entry(1, 2, "a"));
        node.log.push(entry(2, 2, "b"));

        let args = RequestVoteArgs {
            term: 3,
            candidate_id: 2,
            last_log_index: 1,
            last_log_term: 2,
        };
        assert!(!node.handle_request_vote(&args).vote_granted);
    }

    #[tokio::test]
    async fn test_append_entries_accepts_and_resets_timer() {
        let (mut node, _rx) = new_test_core(1, vec![2, 3]);
        let args = AppendEntriesArgs {
            term: 1,
            leader_id: 2,
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![entry(1, 1, "a")],
            leader_commit: 0,
        };
        let before = node.last_heartbeat;
        let output = node.handle_append_entries(&args);
        assert!(output.result.success);
        assert_eq!(output.leader_id, Some(2));
        assert_eq!(node.log.len(), 1);
        assert_eq!(node.state, RaftState::Follower);
        assert!(node.last_heartbeat >= before);
    }

    #[tokio::test]
    async fn test_append_entries_stale_term_no_reset() {
        let (mut node, _rx) = new_test_core(1, vec![2, 3]);
        node.current_term = 2;
        let before = node.last_heartbeat;

        let args = AppendEntriesArgs {
            term: 1,
            leader_id: 2,
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![],
            leader_commit: 0,
        };
        let output = node.handle_append_entries(&args);

        assert!(!output.result.success);
        assert_eq!(output.leader_id, None);
        assert_eq!(node.last_heartbeat, before);
    }

    #[tokio::test]
    async fn test_candidate_steps_down_on_current_leader() {
        let (mut node, _rx) = new_test_core(1, vec![2, 3]);
        node.start_election();
        assert_eq!(node.state, RaftState::Candidate);

        let args = AppendEntriesArgs {
            term: 1,
            leader_id: 2,
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![],
            leader_commit: 0,
        };
        let output = node.handle_append_entries(&args);
        assert!(output.result.success);
        assert_eq!(node.state, RaftState::Follower);
    }

    #[tokio::test]
    async fn test_append_entries_short_log_conflict_hint() {
        let (mut node, _rx) = new_test_core(1, vec![2, 3]);
        // Empty log, leader claims prev at index 5
        let args = AppendEntriesArgs {
            term: 1,
            leader_id: 2,
            prev_log_index: 5,
            prev_log_term: 1,
            entries: vec![],
            leader_commit: 0,
        };
        let output = node.handle_append_entries(&args);
        assert!(!output.result.success);
        assert_eq!(output.result.conflict_index, Some(1));
        assert_eq!(output.result.conflict_term, None);
    }

    #[tokio::test]
    async fn test_append_entries_term_mismatch_conflict_hint() {
        let (mut node, _rx) = new_test_core(1, vec![2, 3]);
        // Three entries of term 1
        node.log.push(entry(1, 1, "a"));
        node.log.push(entry(2, 1, "b"));
        node.log.push(entry(3, 1, "c"));

        // Leader thinks index 3 has term 2
        let args = AppendEntriesArgs {
            term: 2,
            leader_id: 2,
            prev_log_index: 3,
            prev_log_term: 2,
            entries: vec![],
            leader_commit: 0,
        };
        let output = node.handle_append_entries(&args);
        assert!(!output.result.success);
        // Whole term-1 run reported: first index of the conflicting term
        assert_eq!(output.result.conflict_term, Some(1));
        assert_eq!(output.result.conflict_index, Some(1));
        // Log untouched
        assert_eq!(node.log.len(), 3);
    }

    #[tokio::test]
    async fn test_append_entries_truncates_conflicting_tail() {
        let (mut node, _rx) = new_test_core(1, vec![2, 3]);
        node.log.push(entry(1, 1, "a"));
        node.log.push(entry(2, 1, "old"));

        let args = AppendEntriesArgs {
            term: 2,
            leader_id: 2,
            prev_log_index: 1,
            prev_log_term: 1,
            entries: vec![entry(2, 2, "new")],
            leader_commit: 0,
        };
        let output = node.handle_append_entries(&args);

        assert!(output.result.success);
        assert_eq!(node.log.len(), 2);
        assert_eq!(node.log[1].command, cmd("new"));
        assert_eq!(node.log[1].term, 2);
    }

    #[tokio::test]
    async fn test_append_entries_idempotent() {
        let (mut node, _rx) = new_test_core(1, vec![2, 3]);
        let args = AppendEntriesArgs {
            term: 1,
            leader_id: 2,
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![entry(1, 1, "a")],
            leader_commit: 0,
        };
        assert!(node.handle_append_entries(&args).result.success);
        assert_eq!(node.log.len(), 1);

        // Retransmission
        assert!(node.handle_append_entries(&args).result.success);
        assert_eq!(node.log.len(), 1);
    }

    #[tokio::test]
    async fn test_commit_emits_apply_msgs_in_order() {
        let (mut node, mut rx) = new_test_core(1, vec![2, 3]);
        let args = AppendEntriesArgs {
            term: 1,
            leader_id: 2,
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![entry(1, 1, "a"), entry(2, 1, "b"), entry(3, 1, "c")],
            leader_commit: 2,
        };
        let output = node.handle_append_entries(&args);
        assert!(output.result.success);
        assert_eq!(node.commit_index, 2);
        assert_eq!(node.last_applied, 2);

        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 2);
        match &msgs[0] {
            ApplyMsg::Command { index, command, .. } => {
                assert_eq!(*index, 1);
                assert_eq!(command, &cmd("a"));
            }
            other => panic!("unexpected msg: {:?}", other),
        }
        match &msgs[1] {
            ApplyMsg::Command { index, .. } => assert_eq!(*index, 2),
            other => panic!("unexpected msg: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_commit_limited_by_log_length() {
        let (mut node, mut rx) = new_test_core(1, vec![2, 3]);
        let args = AppendEntriesArgs {
            term: 1,
            leader_id: 2,
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![entry(1, 1, "a")],
            leader_commit: 5,
        };
        assert!(node.handle_append_entries(&args).result.success);
        assert_eq!(node.commit_index, 1);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_leader_steps_down_on_higher_term_response() {
        let (mut leader, _rx) = new_test_core(1, vec![2, 3]);
        leader.current_term = 1;
        leader.state = RaftState::Leader;

        let result = AppendEntriesResult::rejected(5, None, None);
        let committed = leader.handle_append_entries_result(2, 1, &result);

        assert!(committed.is_none());
        assert_eq!(leader.state, RaftState::Follower);
        assert_eq!(leader.current_term, 5);
        assert_eq!(leader.voted_for, None);
    }

    #[tokio::test]
    async fn test_leader_conflict_term_jump() {
        let (mut leader, _rx) = new_test_core(1, vec![2, 3]);
        leader.current_term = 3;
        leader.state = RaftState::Leader;
        leader.log.push(entry(1, 1, "a"));
        leader.log.push(entry(2, 1, "b"));
        leader.log.push(entry(3, 2, "c"));
        leader.log.push(entry(4, 3, "d"));
        leader.next_index.insert(2, 5);

        // Follower rejected with a term-1 conflict: jump past our last term-1
        // entry in one step
        let result = AppendEntriesResult::rejected(3, Some(1), Some(1));
        leader.handle_append_entries_result(2, 4, &result);
        assert_eq!(leader.next_index.get(&2), Some(&3));
    }

    #[tokio::test]
    async fn test_leader_conflict_index_jump_unknown_term() {
        let (mut leader, _rx) = new_test_core(1, vec![2, 3]);
        leader.current_term = 3;
        leader.state = RaftState::Leader;
        leader.log.push(entry(1, 3, "a"));
        leader.next_index.insert(2, 2);

        // Follower's log is just short
        let result = AppendEntriesResult::rejected(3, Some(1), None);
        leader.handle_append_entries_result(2, 1, &result);
        assert_eq!(leader.next_index.get(&2), Some(&1));
    }

    #[tokio::test]
    async fn test_match_index_never_decreases() {
        let (mut leader, _rx) = new_test_core(1, vec![2, 3]);
        leader.current_term = 1;
        leader.state = RaftState::Leader;
        leader.match_index.insert(2, 5);

        let result = AppendEntriesResult::ok(1);
        leader.handle_append_entries_result(2, 3, &result);
        assert_eq!(leader.match_index.get(&2), Some(&5));
    }

    #[tokio::test]
    async fn test_entry_not_committed_without_majority() {
        let (mut leader, mut rx) = new_test_core(1, vec![2, 3, 4, 5]);
        leader.current_term = 1;
        leader.state = RaftState::Leader;
        leader.log.push(entry(1, 1, "a"));

        // Only peer 2 replicated: leader + 1 = 2, need 3 of 5
        let result = AppendEntriesResult::ok(1);
        let committed = leader.handle_append_entries_result(2, 1, &result);

        assert!(committed.is_none());
        assert_eq!(leader.commit_index, 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_entry_committed_with_majority() {
        let (mut leader, mut rx) = new_test_core(1, vec![2, 3, 4, 5]);
        leader.current_term = 1;
        leader.state = RaftState::Leader;
        leader.log.push(entry(1, 1, "a"));

        let result = AppendEntriesResult::ok(1);
        assert!(leader.handle_append_entries_result(2, 1, &result).is_none());
        let committed = leader.handle_append_entries_result(3, 1, &result);

        assert_eq!(committed, Some(1));
        assert_eq!(leader.commit_index, 1);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_no_direct_commit_of_prior_term_entries() {
        let (mut leader, mut rx) = new_test_core(1, vec![2, 3]);
        leader.current_term = 2;
        leader.state = RaftState::Leader;
        // Entry from a previous term, fully replicated
        leader.log.push(entry(1, 1, "old"));

        let result = AppendEntriesResult::ok(2);
        let committed = leader.handle_append_entries_result(2, 1, &result);

        assert!(committed.is_none());
        assert_eq!(leader.commit_index, 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_prior_term_entries_commit_via_noop() {
        let (mut leader, mut rx) = new_test_core(1, vec![2, 3]);
        leader.current_term = 1;
        leader.log.push(entry(1, 1, "old"));

        // Win a new election: term 2, no-op appended at index 2
        leader.start_election();
        leader.become_leader();
        assert_eq!(leader.current_term, 2);
        assert_eq!(leader.last_log_index(), 2);

        // Peer confirms replication through the no-op
        let result = AppendEntriesResult::ok(2);
        let committed = leader.handle_append_entries_result(2, 2, &result);

        assert_eq!(committed, Some(2));
        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 2); // old entry + no-op
    }

    #[tokio::test]
    async fn test_propose_leader_and_follower() {
        let (mut node, _rx) = new_test_core(1, vec![2, 3]);

        let (_, _, is_leader) = node.propose(cmd("x"));
        assert!(!is_leader);
        assert_eq!(node.log.len(), 0);

        node.start_election();
        node.become_leader();
        let (index, term, is_leader) = node.propose(cmd("x"));
        assert!(is_leader);
        assert_eq!(index, 2); // no-op at index 1
        assert_eq!(term, 1);
        assert_eq!(node.log.len(), 2);
    }

    #[tokio::test]
    async fn test_election_needs_majority_in_5_node_cluster() {
        let (mut node, _rx) = new_test_core(1, vec![2, 3, 4, 5]);
        node.start_election();

        let granted = RequestVoteResult {
            term: 1,
            vote_granted: true,
        };
        let denied = RequestVoteResult {
            term: 1,
            vote_granted: false,
        };

        assert!(!node.handle_request_vote_result(2, &granted));
        assert!(!node.handle_request_vote_result(3, &denied));
        assert!(node.handle_request_vote_result(4, &granted));
        assert_eq!(node.state, RaftState::Leader);
    }

    #[tokio::test]
    async fn test_candidate_steps_down_on_higher_term_vote_response() {
        let (mut node, _rx) = new_test_core(1, vec![2, 3]);
        node.start_election();

        let result = RequestVoteResult {
            term: 5,
            vote_granted: false,
        };
        assert!(!node.handle_request_vote_result(2, &result));
        assert_eq!(node.state, RaftState::Follower);
        assert_eq!(node.current_term, 5);
    }

    // === Snapshot tests ===

    fn commit_all(node: &mut RaftCore) {
        node.commit_index = node.last_log_index();
        node.emit_committed_entries();
    }

    #[tokio::test]
    async fn test_snapshot_compacts_log() {
        let (mut node, mut rx) = new_test_core(1, vec![2, 3]);
        node.start_election();
        node.become_leader(); // no-op at 1
        node.propose(cmd("a")); // 2
        node.propose(cmd("b")); // 3
        commit_all(&mut node);
        drain(&mut rx);

        node.snapshot(3, b"state-at-3").unwrap();

        assert_eq!(node.snapshot_last_index, 3);
        assert_eq!(node.snapshot_last_term, 1);
        assert_eq!(node.log_count(), 0);
        assert_eq!(node.read_snapshot(), Some(b"state-at-3".to_vec()));

        // New entries start after the boundary and replication bookkeeping
        // still works
        let (index, _, is_leader) = node.propose(cmd("c"));
        assert!(is_leader);
        assert_eq!(index, 4);
        assert_eq!(node.last_log_index(), 4);
        assert_eq!(node.last_log_term(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_ignores_already_covered_index() {
        let (mut node, mut rx) = new_test_core(1, vec![2, 3]);
        node.start_election();
        node.become_leader();
        node.propose(cmd("a"));
        commit_all(&mut node);
        drain(&mut rx);

        node.snapshot(2, b"s2").unwrap();
        assert_eq!(node.snapshot_last_index, 2);

        // Stale request keeps the newer boundary
        node.snapshot(1, b"s1").unwrap();
        assert_eq!(node.snapshot_last_index, 2);
        assert_eq!(node.read_snapshot(), Some(b"s2".to_vec()));
    }

    #[tokio::test]
    async fn test_snapshot_refuses_unapplied_prefix() {
        let (mut node, _rx) = new_test_core(1, vec![2, 3]);
        node.start_election();
        node.become_leader();
        node.propose(cmd("a"));
        // Nothing committed or applied yet

        node.snapshot(2, b"early").unwrap();
        assert_eq!(node.snapshot_last_index, 0);
    }

    #[tokio::test]
    async fn test_handle_install_snapshot_emits_apply_msg() {
        let (mut node, mut rx) = new_test_core(1, vec![2, 3]);
        let args = InstallSnapshotArgs {
            term: 1,
            leader_id: 2,
            last_included_index: 5,
            last_included_term: 1,
            data: b"snap".to_vec(),
        };
        let result = node.handle_install_snapshot(&args);
        assert_eq!(result.term, 1);
        assert_eq!(node.current_leader, Some(2));

        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            ApplyMsg::Snapshot { index, term, data } => {
                assert_eq!(*index, 5);
                assert_eq!(*term, 1);
                assert_eq!(data, &b"snap".to_vec());
            }
            other => panic!("unexpected msg: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handle_install_snapshot_stale_term() {
        let (mut node, mut rx) = new_test_core(1, vec![2, 3]);
        node.current_term = 3;
        let args = InstallSnapshotArgs {
            term: 1,
            leader_id: 2,
            last_included_index: 5,
            last_included_term: 1,
            data: b"snap".to_vec(),
        };
        let result = node.handle_install_snapshot(&args);
        assert_eq!(result.term, 3);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_cond_install_snapshot_adopts_and_rejects_stale() {
        let (mut node, _rx) = new_test_core(1, vec![2, 3]);
        node.log.push(entry(1, 1, "a"));
        node.log.push(entry(2, 1, "b"));
        node.commit_index = 1;
        node.last_applied = 1;

        // Snapshot past everything we have: adopt, log cleared
        assert!(node.cond_install_snapshot(1, 5, b"snap5"));
        assert_eq!(node.snapshot_last_index, 5);
        assert_eq!(node.commit_index, 5);
        assert_eq!(node.last_applied, 5);
        assert_eq!(node.log.len(), 0);
        assert_eq!(node.read_snapshot(), Some(b"snap5".to_vec()));

        // A snapshot at or below commit_index is stale
        assert!(!node.cond_install_snapshot(1, 5, b"again"));
        assert!(!node.cond_install_snapshot(1, 3, b"older"));
    }

    #[tokio::test]
    async fn test_cond_install_snapshot_keeps_matching_suffix() {
        let (mut node, _rx) = new_test_core(1, vec![2, 3]);
        for i in 1..=4 {
            node.log.push(entry(i, 1, "x"));
        }
        node.commit_index = 1;
        node.last_applied = 1;

        assert!(node.cond_install_snapshot(1, 2, b"snap2"));
        assert_eq!(node.snapshot_last_index, 2);
        // Entries 3 and 4 survive
        assert_eq!(node.log.len(), 2);
        assert_eq!(node.log[0].index, 3);
    }

    #[tokio::test]
    async fn test_restart_restores_boundary_from_storage() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut storage = MemoryLogStore::new();
        storage.save_term(4).unwrap();
        storage.save_voted_for(Some(2)).unwrap();
        storage
            .save_snapshot(&Snapshot {
                metadata: SnapshotMetadata {
                    last_included_index: 7,
                    last_included_term: 3,
                },
                data: b"snap".to_vec(),
            })
            .unwrap();
        storage.append_entries(&[entry(8, 4, "after")]).unwrap();

        let node = RaftCore::new(1, vec![2, 3], Box::new(storage), tx);
        assert_eq!(node.current_term, 4);
        assert_eq!(node.voted_for, Some(2));
        assert_eq!(node.snapshot_last_index, 7);
        assert_eq!(node.snapshot_last_term, 3);
        assert_eq!(node.commit_index, 7);
        assert_eq!(node.last_applied, 7);
        assert_eq!(node.last_log_index(), 8);
        assert_eq!(node.read_snapshot(), Some(b"snap".to_vec()));
    }
}
