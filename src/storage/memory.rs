//! In-memory log store for unit tests
//!
//! Fast, no side effects, no persistence across restarts.

use crate::core::raft_core::LogEntry;
use crate::core::snapshot::Snapshot;

use super::{LogStore, StorageError};

/// In-memory `LogStore` implementation.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogStore {
    term: u64,
    voted_for: Option<u64>,
    log: Vec<LogEntry>,
    snapshot: Option<Snapshot>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for MemoryLogStore {
    fn load_term(&self) -> Result<u64, StorageError> {
        Ok(self.term)
    }

    fn save_term(&mut self, term: u64) -> Result<(), StorageError> {
        self.term = term;
        Ok(())
    }

    fn load_voted_for(&self) -> Result<Option<u64>, StorageError> {
        Ok(self.voted_for)
    }

    fn save_voted_for(&mut self, voted_for: Option<u64>) -> Result<(), StorageError> {
        self.voted_for = voted_for;
        Ok(())
    }

    fn load_log(&self) -> Result<Vec<LogEntry>, StorageError> {
        Ok(self.log.clone())
    }

    fn append_entries(&mut self, entries: &[LogEntry]) -> Result<(), StorageError> {
        self.log.extend(entries.iter().cloned());
        Ok(())
    }

    fn truncate_from(&mut self, from_index: u64) -> Result<(), StorageError> {
        self.log.retain(|e| e.index < from_index);
        Ok(())
    }

    fn compact_until(&mut self, before_index: u64) -> Result<(), StorageError> {
        self.log.retain(|e| e.index >= before_index);
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError> {
        Ok(self.snapshot.clone())
    }

    fn save_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), StorageError> {
        self.snapshot = Some(snapshot.clone());
        Ok(())
    }
}
