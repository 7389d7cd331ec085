//! MetaServer: front door and apply pipeline
//!
//! The front door encodes client requests into commands, proposes them to
//! the consensus layer, and parks the calling request on a per-log-index
//! pending-proposal slot until the apply pipeline delivers the outcome or a
//! deadline fires.
//!
//! The apply pipeline is the single consumer of the apply channel: it
//! decodes committed commands in index order, dispatches them into the
//! topology STM and the catalog, triggers log compaction past a size
//! threshold, and installs leader-shipped snapshots. It is the only writer
//! of state-machine data, which is what makes replay deterministic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::core::raft_core::{ApplyMsg, RaftCore};
use crate::core::raft_node::SharedCore;
use crate::core::raft_server::{RaftHandle, RaftServer};
use crate::core::RaftConfig;
use crate::storage::{KvEngine, LogStore};
use crate::transport::Transport;

use super::catalog::{Bucket, Catalog, Object};
use super::command::{BucketOpResult, ErrCode, MetaCommand, MetaRequest, MetaResponse};
use super::topology::{TopoConfig, TopoStm};

/// Configuration for the metadata service.
#[derive(Debug, Clone)]
pub struct MetaConfig {
    pub raft: RaftConfig,
    /// How long a caller waits for its proposal to commit and apply
    pub propose_timeout: Duration,
    /// Retained-log length that triggers a snapshot
    pub compact_threshold: usize,
}

impl Default for MetaConfig {
    fn default() -> Self {
        MetaConfig {
            raft: RaftConfig::default(),
            propose_timeout: Duration::from_secs(3),
            compact_threshold: 20,
        }
    }
}

/// Self-describing snapshot blob of the full state machine.
#[derive(Debug, Serialize, Deserialize)]
struct MetaSnapshot {
    /// Format tag; unknown values are rejected on restore
    format: u32,
    configs: Vec<TopoConfig>,
    buckets: Vec<Bucket>,
    objects: Vec<Object>,
}

const SNAPSHOT_FORMAT: u32 = 1;

fn build_snapshot(stm: &TopoStm, catalog: &Catalog) -> Result<Vec<u8>, String> {
    let snapshot = MetaSnapshot {
        format: SNAPSHOT_FORMAT,
        configs: stm.configs().to_vec(),
        buckets: catalog.list_buckets().map_err(|e| e.to_string())?,
        objects: catalog.all_objects().map_err(|e| e.to_string())?,
    };
    serde_json::to_vec(&snapshot).map_err(|e| e.to_string())
}

fn restore_snapshot(stm: &mut TopoStm, catalog: &Catalog, data: &[u8]) -> Result<(), String> {
    let snapshot: MetaSnapshot = serde_json::from_slice(data).map_err(|e| e.to_string())?;
    if snapshot.format != SNAPSHOT_FORMAT {
        return Err(format!("unsupported snapshot format {}", snapshot.format));
    }
    stm.restore(snapshot.configs).map_err(|e| e.to_string())?;
    catalog
        .restore(&snapshot.buckets, &snapshot.objects)
        .map_err(|e| e.to_string())?;
    Ok(())
}

/// Pending proposals keyed by log index. Each slot holds at most one
/// waiter; resolution takes the sender out of the map, so a late result
/// after a timeout finds nothing and is dropped.
type NotifyMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<MetaResponse>>>>;

/// The metadata service node.
pub struct MetaServer {
    raft: RaftHandle,
    shared_core: SharedCore,
    notify: NotifyMap,
    propose_timeout: Duration,
    stop_tx: mpsc::Sender<()>,
}

impl MetaServer {
    /// Construct and start a node: consensus server, state machine restore
    /// from the last snapshot, then the apply pipeline. Traffic may be
    /// accepted once this returns.
    pub async fn start<T: Transport + 'static>(
        id: u64,
        peers: Vec<u64>,
        log_store: Box<dyn LogStore>,
        meta_engine: Arc<dyn KvEngine>,
        transport: T,
        config: MetaConfig,
    ) -> Arc<MetaServer> {
        let (apply_tx, apply_rx) = mpsc::unbounded_channel();
        let core = RaftCore::new(id, peers, log_store, apply_tx);
        let (raft_server, shared_core) = RaftServer::with_config(core, transport, config.raft.clone());

        let mut stm = TopoStm::open(meta_engine.clone()).expect("failed to load topology configs");
        let catalog = Catalog::new(meta_engine);

        // Restore the state machine before the pipeline starts consuming
        let startup_snapshot = shared_core.lock().await.read_snapshot();
        if let Some(data) = startup_snapshot {
            match restore_snapshot(&mut stm, &catalog, &data) {
                Ok(()) => info!(node = id, "state machine restored from snapshot"),
                Err(err) => warn!(node = id, %err, "startup snapshot restore failed"),
            }
        }

        let notify: NotifyMap = Arc::new(StdMutex::new(HashMap::new()));
        let (stop_tx, stop_rx) = mpsc::channel(1);

        let raft = raft_server.start();

        let pipeline = ApplyPipeline {
            apply_rx,
            stop_rx,
            shared_core: shared_core.clone(),
            stm,
            catalog,
            notify: notify.clone(),
            compact_threshold: config.compact_threshold,
        };
        tokio::spawn(pipeline.run());

        Arc::new(MetaServer {
            raft,
            shared_core,
            notify,
            propose_timeout: config.propose_timeout,
            stop_tx,
        })
    }

    /// Shared consensus core, for wiring the RPC router.
    pub fn shared_core(&self) -> SharedCore {
        self.shared_core.clone()
    }

    /// Handle one client request: encode, propose, await the applied result.
    pub async fn submit(&self, request: MetaRequest) -> MetaResponse {
        let command = request.into_command().encode();

        let (parked_tx, parked_rx) = oneshot::channel();
        let (index, _term, is_leader) = match self.raft.propose(command, parked_rx).await {
            Ok(result) => result,
            Err(_) => return MetaResponse::wrong_leader(None),
        };
        if !is_leader {
            let hint = self.shared_core.lock().await.leader_id();
            return MetaResponse::wrong_leader(hint);
        }

        // Park the waiter, then let replication proceed
        let response_rx = {
            let mut notify = self.notify.lock().unwrap();
            let (tx, rx) = oneshot::channel();
            notify.insert(index, tx);
            rx
        };
        let _ = parked_tx.send(());

        match tokio::time::timeout(self.propose_timeout, response_rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                // Sender dropped without resolving (pipeline shutdown)
                MetaResponse::error(ErrCode::RpcTimeout)
            }
            Err(_) => {
                // Deadline fired; discard the slot so a late apply finds no
                // waiter
                self.notify.lock().unwrap().remove(&index);
                debug!(index, "proposal timed out");
                MetaResponse::error(ErrCode::RpcTimeout)
            }
        }
    }

    /// Stop the apply pipeline and the consensus loop. One-shot and final.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(()).await;
        self.raft.shutdown().await;
    }
}

/// Single consumer of the apply channel.
struct ApplyPipeline {
    apply_rx: mpsc::UnboundedReceiver<ApplyMsg>,
    stop_rx: mpsc::Receiver<()>,
    shared_core: SharedCore,
    stm: TopoStm,
    catalog: Catalog,
    notify: NotifyMap,
    compact_threshold: usize,
}

impl ApplyPipeline {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.stop_rx.recv() => break,
                msg = self.apply_rx.recv() => match msg {
                    None => break,
                    Some(ApplyMsg::Command { index, term: _, command }) => {
                        self.apply_command(index, command).await;
                    }
                    Some(ApplyMsg::Snapshot { term, index, data }) => {
                        self.install_snapshot(term, index, data).await;
                    }
                },
            }
        }
        info!("apply pipeline stopped");
    }

    async fn apply_command(&mut self, index: u64, command: Vec<u8>) {
        // Leader no-op entries carry no payload and produce no response
        let response = if command.is_empty() {
            None
        } else {
            Some(self.dispatch(&command))
        };
        debug!(index, "applied committed entry");

        self.maybe_compact(index).await;

        if let Some(response) = response {
            // At-most-once: resolve the waiter if one is still parked,
            // otherwise the response is dropped
            let waiter = self.notify.lock().unwrap().remove(&index);
            if let Some(tx) = waiter {
                let _ = tx.send(response);
            }
        }
    }

    /// Exhaustive dispatch of a decoded command into the state machine.
    /// Store failures become error codes on the response; they never abort
    /// the pipeline.
    fn dispatch(&mut self, command: &[u8]) -> MetaResponse {
        let command = match MetaCommand::decode(command) {
            Ok(command) => command,
            Err(err) => {
                warn!(%err, "undecodable committed command");
                return MetaResponse::error(ErrCode::BadCommand);
            }
        };

        match command {
            MetaCommand::Join { server_groups } => match self.stm.join(server_groups) {
                Ok(()) => MetaResponse::ok(),
                Err(err) => {
                    warn!(%err, "join failed");
                    MetaResponse::error(ErrCode::ApplyJoinFailed)
                }
            },
            MetaCommand::Leave { group_ids } => match self.stm.leave(&group_ids) {
                Ok(()) => MetaResponse::ok(),
                Err(err) => {
                    warn!(%err, "leave failed");
                    MetaResponse::error(ErrCode::ApplyLeaveFailed)
                }
            },
            MetaCommand::Query { config_version } => {
                let config = self.stm.query(config_version);
                let mut response = MetaResponse::ok();
                response.server_group_metas = Some(config.into());
                response
            }
            MetaCommand::BucketAdd {
                bucket_id,
                bucket_name,
            } => {
                debug!(%bucket_id, %bucket_name, "adding bucket");
                let bucket = Bucket {
                    bucket_id,
                    bucket_name,
                };
                match self.catalog.add_bucket(&bucket) {
                    Ok(()) => MetaResponse::ok(),
                    Err(err) => {
                        warn!(%err, "bucket add failed");
                        MetaResponse::error(ErrCode::PutBucketFailed)
                    }
                }
            }
            MetaCommand::BucketDel { bucket_id } => match self.catalog.del_bucket(&bucket_id) {
                Ok(()) => MetaResponse::ok(),
                Err(err) => {
                    warn!(%err, "bucket delete failed");
                    MetaResponse::error(ErrCode::DelBucketFailed)
                }
            },
            MetaCommand::BucketList => match self.catalog.list_buckets() {
                Ok(buckets) => {
                    let mut response = MetaResponse::ok();
                    response.bucket_op = Some(BucketOpResult {
                        buckets,
                        objects: Vec::new(),
                    });
                    response
                }
                Err(err) => {
                    warn!(%err, "bucket list failed");
                    MetaResponse::error(ErrCode::ListBucketsFailed)
                }
            },
            MetaCommand::ObjectPut { object } => {
                debug!(object_id = %object.object_id, bucket = %object.from_bucket_id, "putting object");
                match self.catalog.put_object(&object) {
                    Ok(()) => MetaResponse::ok(),
                    Err(err) => {
                        warn!(%err, "object put failed");
                        MetaResponse::error(ErrCode::PutObjectFailed)
                    }
                }
            }
            MetaCommand::ObjectGet { .. } => MetaResponse::error(ErrCode::Unsupported),
            MetaCommand::ObjectList { bucket_id } => match self.catalog.list_objects(&bucket_id) {
                Ok(objects) => {
                    let mut response = MetaResponse::ok();
                    response.bucket_op = Some(BucketOpResult {
                        buckets: Vec::new(),
                        objects,
                    });
                    response
                }
                Err(err) => {
                    warn!(%err, "object list failed");
                    MetaResponse::error(ErrCode::ListObjectsFailed)
                }
            },
        }
    }

    /// Snapshot once the retained log outgrows the configured bound.
    async fn maybe_compact(&mut self, index: u64) {
        let over_threshold = {
            let core = self.shared_core.lock().await;
            core.log_count() > self.compact_threshold
        };
        if !over_threshold {
            return;
        }

        match build_snapshot(&self.stm, &self.catalog) {
            Ok(data) => {
                let mut core = self.shared_core.lock().await;
                if let Err(err) = core.snapshot(index, &data) {
                    warn!(%err, index, "snapshot persist failed");
                }
            }
            Err(err) => warn!(%err, "building snapshot failed"),
        }
    }

    /// Handle a leader-shipped snapshot: adopt it only if it is ahead of
    /// locally committed state, then replace the whole state machine.
    async fn install_snapshot(&mut self, term: u64, index: u64, data: Vec<u8>) {
        let accepted = {
            let mut core = self.shared_core.lock().await;
            core.cond_install_snapshot(term, index, &data)
        };
        if !accepted {
            return;
        }
        if let Err(err) = restore_snapshot(&mut self.stm, &self.catalog, &data) {
            // The boundary has already advanced; an unreadable blob here
            // leaves the replica unusable
            error!(%err, index, "failed to restore installed snapshot");
        } else {
            info!(index, "state machine replaced from installed snapshot");
        }
    }
}
