//! Command and response types for the metadata service
//!
//! Client requests are converted into [`MetaCommand`] values, serialized,
//! and replicated through the consensus log. The conversion is where
//! generated identifiers are minted: ids must already be inside the command
//! bytes when they are replicated, so every replica applies the exact same
//! mutation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::catalog::{Bucket, Object, ObjectBlockMeta};
use super::topology::TopoConfig;

/// Client-facing request, one variant per operation kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MetaRequest {
    Join {
        server_groups: BTreeMap<u64, Vec<String>>,
    },
    Leave {
        group_ids: Vec<u64>,
    },
    Query {
        config_version: i64,
    },
    BucketAdd {
        bucket_name: String,
    },
    BucketDel {
        bucket_id: String,
    },
    BucketList,
    ObjectPut {
        object_name: String,
        bucket_id: String,
        #[serde(default)]
        block_meta: Vec<ObjectBlockMeta>,
    },
    ObjectGet {
        object_id: String,
    },
    ObjectList {
        bucket_id: String,
    },
}

impl MetaRequest {
    /// Convert into the replicated command, minting ids for create
    /// operations here (outside the deterministic apply path).
    pub fn into_command(self) -> MetaCommand {
        match self {
            MetaRequest::Join { server_groups } => MetaCommand::Join { server_groups },
            MetaRequest::Leave { group_ids } => MetaCommand::Leave { group_ids },
            MetaRequest::Query { config_version } => MetaCommand::Query { config_version },
            MetaRequest::BucketAdd { bucket_name } => MetaCommand::BucketAdd {
                bucket_id: uuid::Uuid::new_v4().to_string(),
                bucket_name,
            },
            MetaRequest::BucketDel { bucket_id } => MetaCommand::BucketDel { bucket_id },
            MetaRequest::BucketList => MetaCommand::BucketList,
            MetaRequest::ObjectPut {
                object_name,
                bucket_id,
                block_meta,
            } => MetaCommand::ObjectPut {
                object: Object {
                    object_id: uuid::Uuid::new_v4().to_string(),
                    object_name,
                    from_bucket_id: bucket_id,
                    block_meta,
                },
            },
            MetaRequest::ObjectGet { object_id } => MetaCommand::ObjectGet { object_id },
            MetaRequest::ObjectList { bucket_id } => MetaCommand::ObjectList { bucket_id },
        }
    }
}

/// Replicated command, decoded and dispatched by the apply pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MetaCommand {
    Join {
        server_groups: BTreeMap<u64, Vec<String>>,
    },
    Leave {
        group_ids: Vec<u64>,
    },
    Query {
        config_version: i64,
    },
    BucketAdd {
        bucket_id: String,
        bucket_name: String,
    },
    BucketDel {
        bucket_id: String,
    },
    BucketList,
    ObjectPut {
        object: Object,
    },
    ObjectGet {
        object_id: String,
    },
    ObjectList {
        bucket_id: String,
    },
}

impl MetaCommand {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("meta command serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Error codes carried in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrCode {
    Ok,
    /// Not the leader; retry against `leader_hint`
    WrongLeader,
    /// Proposal did not commit within the deadline; safe to retry
    RpcTimeout,
    ApplyJoinFailed,
    ApplyLeaveFailed,
    ApplyQueryFailed,
    PutBucketFailed,
    DelBucketFailed,
    ListBucketsFailed,
    PutObjectFailed,
    ListObjectsFailed,
    /// Operation is reserved but not specified
    Unsupported,
    /// Committed command could not be decoded
    BadCommand,
}

/// Topology payload of a Query response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerGroupMetas {
    pub config_version: u64,
    pub server_groups: BTreeMap<u64, Vec<String>>,
    pub slots: Vec<u64>,
}

impl From<TopoConfig> for ServerGroupMetas {
    fn from(config: TopoConfig) -> Self {
        ServerGroupMetas {
            config_version: config.version,
            server_groups: config.server_groups,
            slots: config.slots,
        }
    }
}

/// Catalog payload of bucket/object responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketOpResult {
    #[serde(default)]
    pub buckets: Vec<Bucket>,
    #[serde(default)]
    pub objects: Vec<Object>,
}

/// Response returned to the front-door caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaResponse {
    pub err_code: ErrCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader_hint: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_group_metas: Option<ServerGroupMetas>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_op: Option<BucketOpResult>,
}

impl MetaResponse {
    pub fn ok() -> Self {
        MetaResponse {
            err_code: ErrCode::Ok,
            leader_hint: None,
            server_group_metas: None,
            bucket_op: None,
        }
    }

    pub fn error(err_code: ErrCode) -> Self {
        MetaResponse {
            err_code,
            leader_hint: None,
            server_group_metas: None,
            bucket_op: None,
        }
    }

    pub fn wrong_leader(leader_hint: Option<u64>) -> Self {
        MetaResponse {
            err_code: ErrCode::WrongLeader,
            leader_hint,
            server_group_metas: None,
            bucket_op: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_round_trip() {
        let mut groups = BTreeMap::new();
        groups.insert(1, vec!["10.0.0.1:7001".to_string()]);
        let command = MetaCommand::Join {
            server_groups: groups,
        };

        let bytes = command.encode();
        let decoded = MetaCommand::decode(&bytes).unwrap();
        match decoded {
            MetaCommand::Join { server_groups } => {
                assert_eq!(server_groups.get(&1).unwrap()[0], "10.0.0.1:7001");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(MetaCommand::decode(b"not json").is_err());
    }

    #[test]
    fn test_bucket_add_mints_id_at_encode_time() {
        let req = MetaRequest::BucketAdd {
            bucket_name: "photos".to_string(),
        };
        let command = req.into_command();
        match &command {
            MetaCommand::BucketAdd {
                bucket_id,
                bucket_name,
            } => {
                assert!(!bucket_id.is_empty());
                assert_eq!(bucket_name, "photos");
            }
            other => panic!("unexpected command: {:?}", other),
        }

        // The id is embedded in the bytes, so every replica sees the same one
        let decoded = MetaCommand::decode(&command.encode()).unwrap();
        match (command, decoded) {
            (
                MetaCommand::BucketAdd { bucket_id: a, .. },
                MetaCommand::BucketAdd { bucket_id: b, .. },
            ) => assert_eq!(a, b),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_object_put_carries_owning_bucket() {
        let req = MetaRequest::ObjectPut {
            object_name: "img.png".to_string(),
            bucket_id: "bkt-1".to_string(),
            block_meta: vec![ObjectBlockMeta {
                block_id: 1,
                block_slot_id: 4,
            }],
        };
        match req.into_command() {
            MetaCommand::ObjectPut { object } => {
                assert_eq!(object.from_bucket_id, "bkt-1");
                assert_eq!(object.block_meta.len(), 1);
                assert!(!object.object_id.is_empty());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
