//! Storage layer
//!
//! - `KvEngine`: narrow key-value interface (`MemEngine`, `FileEngine`)
//! - `LogStore`: Raft durable state (`KvLogStore` over an engine,
//!   `MemoryLogStore` for unit tests)

pub mod engine;
pub mod file_engine;
pub mod kv_log;
pub mod memory;
pub mod traits;

pub use engine::{EngineError, KvEngine, MemEngine};
pub use file_engine::FileEngine;
pub use kv_log::KvLogStore;
pub use memory::MemoryLogStore;
pub use traits::{LogStore, StorageError};
