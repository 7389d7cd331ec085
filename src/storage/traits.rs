//! Durable-state interface for the Raft core
//!
//! Raft requires term, vote and log entries to be on stable storage before
//! responding to RPCs. All operations are synchronous to keep the core's
//! logic simple; the `Send` bound is required for use in async contexts.

use thiserror::Error;

use crate::core::raft_core::LogEntry;
use crate::core::snapshot::Snapshot;

use super::engine::EngineError;

/// Errors that can occur during log-store operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// I/O error (e.g., disk full, permission denied)
    #[error("I/O error: {0}")]
    Io(String),
    /// Data corruption detected
    #[error("data corruption: {0}")]
    Corruption(String),
    /// Stored bytes could not be decoded
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<EngineError> for StorageError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Io(msg) => StorageError::Io(msg),
            EngineError::Corruption(msg) => StorageError::Corruption(msg),
        }
    }
}

/// Persistent store for Raft state: term, vote, ordered log, snapshot.
///
/// Implementations must ensure durability before returning from mutations.
pub trait LogStore: Send {
    /// Current term, 0 if nothing has been persisted yet.
    fn load_term(&self) -> Result<u64, StorageError>;

    fn save_term(&mut self, term: u64) -> Result<(), StorageError>;

    /// Candidate voted for in the current term, None if no vote was cast.
    fn load_voted_for(&self) -> Result<Option<u64>, StorageError>;

    fn save_voted_for(&mut self, voted_for: Option<u64>) -> Result<(), StorageError>;

    /// All retained log entries, in index order.
    fn load_log(&self) -> Result<Vec<LogEntry>, StorageError>;

    /// Append entries after any existing ones.
    fn append_entries(&mut self, entries: &[LogEntry]) -> Result<(), StorageError>;

    /// Remove all entries with index >= `from_index` (conflict resolution).
    fn truncate_from(&mut self, from_index: u64) -> Result<(), StorageError>;

    /// Remove all entries with index < `before_index` (snapshot compaction).
    fn compact_until(&mut self, before_index: u64) -> Result<(), StorageError>;

    /// Most recent snapshot, None if none was saved.
    fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError>;

    fn save_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), StorageError>;
}
