//! Raft log persistence over a key-value engine
//!
//! Layout inside the engine:
//! - `raft_term`, `raft_vote`: JSON scalars
//! - `raft_log_<index>`: one JSON row per entry, index zero-padded so the
//!   engine's prefix scan returns entries in index order
//! - `raft_snapshot`: the latest snapshot (metadata + blob)

use std::sync::Arc;

use crate::core::raft_core::LogEntry;
use crate::core::snapshot::Snapshot;

use super::engine::KvEngine;
use super::{LogStore, StorageError};

const TERM_KEY: &[u8] = b"raft_term";
const VOTE_KEY: &[u8] = b"raft_vote";
const SNAPSHOT_KEY: &[u8] = b"raft_snapshot";
const LOG_PREFIX: &[u8] = b"raft_log_";

fn entry_key(index: u64) -> Vec<u8> {
    format!("raft_log_{:020}", index).into_bytes()
}

fn codec_err<E: std::fmt::Display>(err: E) -> StorageError {
    StorageError::Codec(err.to_string())
}

/// `LogStore` implementation over any key-value engine.
pub struct KvLogStore {
    engine: Arc<dyn KvEngine>,
}

impl KvLogStore {
    pub fn new(engine: Arc<dyn KvEngine>) -> Self {
        KvLogStore { engine }
    }
}

impl LogStore for KvLogStore {
    fn load_term(&self) -> Result<u64, StorageError> {
        match self.engine.get(TERM_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(codec_err),
            None => Ok(0),
        }
    }

    fn save_term(&mut self, term: u64) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(&term).map_err(codec_err)?;
        Ok(self.engine.put(TERM_KEY, &bytes)?)
    }

    fn load_voted_for(&self) -> Result<Option<u64>, StorageError> {
        match self.engine.get(VOTE_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(codec_err),
            None => Ok(None),
        }
    }

    fn save_voted_for(&mut self, voted_for: Option<u64>) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(&voted_for).map_err(codec_err)?;
        Ok(self.engine.put(VOTE_KEY, &bytes)?)
    }

    fn load_log(&self) -> Result<Vec<LogEntry>, StorageError> {
        let kvs = self.engine.prefix_scan(LOG_PREFIX)?;
        kvs.into_iter()
            .map(|(_, v)| serde_json::from_slice(&v).map_err(codec_err))
            .collect()
    }

    fn append_entries(&mut self, entries: &[LogEntry]) -> Result<(), StorageError> {
        for entry in entries {
            let bytes = serde_json::to_vec(entry).map_err(codec_err)?;
            self.engine.put(&entry_key(entry.index), &bytes)?;
        }
        Ok(())
    }

    fn truncate_from(&mut self, from_index: u64) -> Result<(), StorageError> {
        let kvs = self.engine.prefix_scan(LOG_PREFIX)?;
        for (key, value) in kvs {
            let entry: LogEntry = serde_json::from_slice(&value).map_err(codec_err)?;
            if entry.index >= from_index {
                self.engine.delete(&key)?;
            }
        }
        Ok(())
    }

    fn compact_until(&mut self, before_index: u64) -> Result<(), StorageError> {
        let kvs = self.engine.prefix_scan(LOG_PREFIX)?;
        for (key, value) in kvs {
            let entry: LogEntry = serde_json::from_slice(&value).map_err(codec_err)?;
            if entry.index < before_index {
                self.engine.delete(&key)?;
            }
        }
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError> {
        match self.engine.get(SNAPSHOT_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(codec_err),
            None => Ok(None),
        }
    }

    fn save_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(snapshot).map_err(codec_err)?;
        Ok(self.engine.put(SNAPSHOT_KEY, &bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::snapshot::SnapshotMetadata;
    use crate::storage::engine::MemEngine;

    fn entry(index: u64, term: u64) -> LogEntry {
        LogEntry {
            term,
            index,
            command: format!("cmd-{}", index).into_bytes(),
        }
    }

    fn new_store() -> KvLogStore {
        KvLogStore::new(Arc::new(MemEngine::new()))
    }

    #[test]
    fn test_term_and_vote_round_trip() {
        let mut store = new_store();

        assert_eq!(store.load_term().unwrap(), 0);
        assert_eq!(store.load_voted_for().unwrap(), None);

        store.save_term(7).unwrap();
        store.save_voted_for(Some(3)).unwrap();
        assert_eq!(store.load_term().unwrap(), 7);
        assert_eq!(store.load_voted_for().unwrap(), Some(3));

        store.save_voted_for(None).unwrap();
        assert_eq!(store.load_voted_for().unwrap(), None);
    }

    #[test]
    fn test_log_append_ordered() {
        let mut store = new_store();

        // Append out of call order; scan order must still be index order
        store.append_entries(&[entry(1, 1), entry(2, 1)]).unwrap();
        store.append_entries(&[entry(3, 2)]).unwrap();

        let log = store.load_log().unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].index, 1);
        assert_eq!(log[2].index, 3);
        assert_eq!(log[2].term, 2);
    }

    #[test]
    fn test_log_padding_beyond_single_digit() {
        let mut store = new_store();
        for i in 1..=12 {
            store.append_entries(&[entry(i, 1)]).unwrap();
        }
        let log = store.load_log().unwrap();
        // Without zero padding, index 10 would sort before index 2
        let indices: Vec<u64> = log.iter().map(|e| e.index).collect();
        assert_eq!(indices, (1..=12).collect::<Vec<u64>>());
    }

    #[test]
    fn test_truncate_and_compact() {
        let mut store = new_store();
        for i in 1..=5 {
            store.append_entries(&[entry(i, 1)]).unwrap();
        }

        store.truncate_from(4).unwrap();
        let log = store.load_log().unwrap();
        assert_eq!(log.last().unwrap().index, 3);

        store.compact_until(3).unwrap();
        let log = store.load_log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].index, 3);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut store = new_store();
        assert!(store.load_snapshot().unwrap().is_none());

        let snapshot = Snapshot {
            metadata: SnapshotMetadata {
                last_included_index: 9,
                last_included_term: 2,
            },
            data: vec![1, 2, 3],
        };
        store.save_snapshot(&snapshot).unwrap();

        let loaded = store.load_snapshot().unwrap().unwrap();
        assert_eq!(loaded.metadata.last_included_index, 9);
        assert_eq!(loaded.metadata.last_included_term, 2);
        assert_eq!(loaded.data, vec![1, 2, 3]);
    }
}
