//! Metadata service layer
//!
//! - `command`: request/command sum types and response codes
//! - `topology`: versioned server-group and slot ownership STM
//! - `catalog`: bucket/object rows in the metadata engine
//! - `server`: front door (propose/await) and the apply pipeline

pub mod catalog;
pub mod command;
pub mod server;
pub mod topology;

pub use catalog::{Bucket, Object, ObjectBlockMeta};
pub use command::{BucketOpResult, ErrCode, MetaCommand, MetaRequest, MetaResponse, ServerGroupMetas};
pub use server::{MetaConfig, MetaServer};
pub use topology::{TopoConfig, SLOT_COUNT};
