//! Key-value engine abstraction
//!
//! Both the Raft log and the metadata catalog sit on top of the same narrow
//! engine interface: put/get/delete plus an ordered prefix scan. Each node
//! owns two engine instances (one for the consensus log, one for metadata
//! rows), and each instance has exactly one logical writer.

use std::collections::BTreeMap;
use std::sync::Mutex;

use thiserror::Error;

/// Errors surfaced by a key-value engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// I/O error (e.g., disk full, permission denied)
    #[error("I/O error: {0}")]
    Io(String),
    /// Data corruption detected
    #[error("data corruption: {0}")]
    Corruption(String),
}

/// Narrow interface over a key-value engine.
///
/// Methods take `&self`; implementations handle their own interior locking,
/// the same way a real engine handle would.
pub trait KvEngine: Send + Sync {
    /// Store a key-value pair. Must be durable before returning for
    /// durable implementations.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError>;

    /// Fetch the value stored under `key`, if any.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError>;

    /// Remove `key`. Removing a missing key is not an error.
    fn delete(&self, key: &[u8]) -> Result<(), EngineError>;

    /// All pairs whose key starts with `prefix`, in ascending key order.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, EngineError>;
}

/// In-memory engine for tests and ephemeral nodes.
///
/// No disk I/O, no persistence across restarts.
#[derive(Debug, Default)]
pub struct MemEngine {
    data: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemEngine {
    pub fn new() -> Self {
        MemEngine {
            data: Mutex::new(BTreeMap::new()),
        }
    }
}

impl KvEngine for MemEngine {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
        self.data.lock().unwrap().remove(key);
        Ok(())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, EngineError> {
        let data = self.data.lock().unwrap();
        Ok(data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
