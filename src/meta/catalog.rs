//! Bucket/object metadata catalog
//!
//! Rows live in the metadata engine under fixed key prefixes, one JSON row
//! per entity. Objects carry a non-owning back-reference to their bucket;
//! object listing filters on it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::{EngineError, KvEngine};

/// Key prefix for bucket rows.
pub const BUCKET_META_PREFIX: &str = "bucket_meta_";
/// Key prefix for object rows.
pub const OBJECT_META_PREFIX: &str = "object_meta_";

/// A storage bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub bucket_id: String,
    pub bucket_name: String,
}

/// Placement metadata for one block of an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectBlockMeta {
    pub block_id: u64,
    pub block_slot_id: u64,
}

/// An object row; `from_bucket_id` is a lookup-only back-reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    pub object_id: String,
    pub object_name: String,
    pub from_bucket_id: String,
    #[serde(default)]
    pub block_meta: Vec<ObjectBlockMeta>,
}

/// Errors surfaced by catalog operations.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("engine error: {0}")]
    Store(#[from] EngineError),
    #[error("stored row is unreadable: {0}")]
    Codec(String),
}

fn bucket_key(bucket_id: &str) -> Vec<u8> {
    format!("{}{}", BUCKET_META_PREFIX, bucket_id).into_bytes()
}

fn object_key(object_id: &str) -> Vec<u8> {
    format!("{}{}", OBJECT_META_PREFIX, object_id).into_bytes()
}

/// Catalog over the metadata engine. Written only by the apply pipeline.
pub struct Catalog {
    engine: Arc<dyn KvEngine>,
}

impl Catalog {
    pub fn new(engine: Arc<dyn KvEngine>) -> Self {
        Catalog { engine }
    }

    pub fn add_bucket(&self, bucket: &Bucket) -> Result<(), CatalogError> {
        let bytes = serde_json::to_vec(bucket).map_err(|e| CatalogError::Codec(e.to_string()))?;
        Ok(self.engine.put(&bucket_key(&bucket.bucket_id), &bytes)?)
    }

    pub fn del_bucket(&self, bucket_id: &str) -> Result<(), CatalogError> {
        Ok(self.engine.delete(&bucket_key(bucket_id))?)
    }

    pub fn list_buckets(&self) -> Result<Vec<Bucket>, CatalogError> {
        let kvs = self.engine.prefix_scan(BUCKET_META_PREFIX.as_bytes())?;
        kvs.into_iter()
            .map(|(_, v)| serde_json::from_slice(&v).map_err(|e| CatalogError::Codec(e.to_string())))
            .collect()
    }

    pub fn put_object(&self, object: &Object) -> Result<(), CatalogError> {
        let bytes = serde_json::to_vec(object).map_err(|e| CatalogError::Codec(e.to_string()))?;
        Ok(self.engine.put(&object_key(&object.object_id), &bytes)?)
    }

    /// Objects owned by `bucket_id`, in key order.
    pub fn list_objects(&self, bucket_id: &str) -> Result<Vec<Object>, CatalogError> {
        let kvs = self.engine.prefix_scan(OBJECT_META_PREFIX.as_bytes())?;
        let mut objects = Vec::new();
        for (_, v) in kvs {
            let object: Object =
                serde_json::from_slice(&v).map_err(|e| CatalogError::Codec(e.to_string()))?;
            if object.from_bucket_id == bucket_id {
                objects.push(object);
            }
        }
        Ok(objects)
    }

    /// Every object row, for snapshotting.
    pub fn all_objects(&self) -> Result<Vec<Object>, CatalogError> {
        let kvs = self.engine.prefix_scan(OBJECT_META_PREFIX.as_bytes())?;
        kvs.into_iter()
            .map(|(_, v)| serde_json::from_slice(&v).map_err(|e| CatalogError::Codec(e.to_string())))
            .collect()
    }

    /// Replace the whole catalog from snapshot rows.
    pub fn restore(&self, buckets: &[Bucket], objects: &[Object]) -> Result<(), CatalogError> {
        for (key, _) in self.engine.prefix_scan(BUCKET_META_PREFIX.as_bytes())? {
            self.engine.delete(&key)?;
        }
        for (key, _) in self.engine.prefix_scan(OBJECT_META_PREFIX.as_bytes())? {
            self.engine.delete(&key)?;
        }
        for bucket in buckets {
            self.add_bucket(bucket)?;
        }
        for object in objects {
            self.put_object(object)?;
        }
        Ok(())
    }
}
