//! Topology state machine: versioned server-group and slot ownership
//!
//! Every Join/Leave produces a new immutable config version; slot ownership
//! is rebalanced deterministically so all replicas converge on identical
//! configs. Versions are persisted to the metadata engine under a fixed key
//! prefix and reloaded on open.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::storage::{EngineError, KvEngine};

/// Number of hash slots partitioned across server groups.
pub const SLOT_COUNT: usize = 10;

/// Group id marking an unassigned slot.
pub const UNASSIGNED: u64 = 0;

const TOPO_CONF_PREFIX: &str = "topo_conf_";

/// One immutable topology version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopoConfig {
    /// Monotonic version, 0 for the initial empty config
    pub version: u64,
    /// group id -> replica addresses
    pub server_groups: BTreeMap<u64, Vec<String>>,
    /// Owner group id per slot, `UNASSIGNED` when no group holds it
    pub slots: Vec<u64>,
}

impl TopoConfig {
    fn initial() -> Self {
        TopoConfig {
            version: 0,
            server_groups: BTreeMap::new(),
            slots: vec![UNASSIGNED; SLOT_COUNT],
        }
    }
}

/// Errors surfaced by topology mutations.
#[derive(Debug, Clone, Error)]
pub enum TopoError {
    #[error("failed to persist config: {0}")]
    Store(#[from] EngineError),
    #[error("stored config is unreadable: {0}")]
    Codec(String),
}

/// The topology state machine. Written only by the apply pipeline.
pub struct TopoStm {
    engine: Arc<dyn KvEngine>,
    configs: Vec<TopoConfig>,
}

fn config_key(version: u64) -> Vec<u8> {
    format!("{}{:012}", TOPO_CONF_PREFIX, version).into_bytes()
}

impl TopoStm {
    /// Load persisted config versions from the engine, seeding the initial
    /// empty config when none exist.
    pub fn open(engine: Arc<dyn KvEngine>) -> Result<Self, TopoError> {
        let kvs = engine.prefix_scan(TOPO_CONF_PREFIX.as_bytes())?;
        let mut configs = Vec::with_capacity(kvs.len() + 1);
        for (_, value) in kvs {
            let config: TopoConfig =
                serde_json::from_slice(&value).map_err(|e| TopoError::Codec(e.to_string()))?;
            configs.push(config);
        }
        if configs.is_empty() {
            configs.push(TopoConfig::initial());
        }
        Ok(TopoStm { engine, configs })
    }

    fn latest(&self) -> &TopoConfig {
        self.configs.last().expect("config list is never empty")
    }

    /// Current highest version.
    pub fn latest_version(&self) -> u64 {
        self.latest().version
    }

    /// All retained versions, for snapshotting.
    pub fn configs(&self) -> &[TopoConfig] {
        &self.configs
    }

    /// Replace all versions from a snapshot, rewriting the engine rows.
    pub fn restore(&mut self, configs: Vec<TopoConfig>) -> Result<(), TopoError> {
        let configs = if configs.is_empty() {
            vec![TopoConfig::initial()]
        } else {
            configs
        };
        let max_version = configs.last().map(|c| c.version).unwrap_or(0);
        // Drop rows the snapshot no longer covers, then rewrite
        for (key, _) in self.engine.prefix_scan(TOPO_CONF_PREFIX.as_bytes())? {
            if key > config_key(max_version) {
                self.engine.delete(&key)?;
            }
        }
        for config in &configs {
            let bytes = serde_json::to_vec(config).map_err(|e| TopoError::Codec(e.to_string()))?;
            self.engine.put(&config_key(config.version), &bytes)?;
        }
        self.configs = configs;
        Ok(())
    }

    fn push_config(&mut self, config: TopoConfig) -> Result<(), TopoError> {
        let bytes = serde_json::to_vec(&config).map_err(|e| TopoError::Codec(e.to_string()))?;
        self.engine.put(&config_key(config.version), &bytes)?;
        debug!(version = config.version, "new topology config");
        self.configs.push(config);
        Ok(())
    }

    /// Merge new server groups into the latest config and rebalance.
    pub fn join(&mut self, groups: BTreeMap<u64, Vec<String>>) -> Result<(), TopoError> {
        let mut next = self.latest().clone();
        next.version += 1;
        for (gid, addrs) in groups {
            next.server_groups.insert(gid, addrs);
        }
        rebalance(&next.server_groups, &mut next.slots);
        self.push_config(next)
    }

    /// Remove server groups; their slots move to the remaining groups.
    pub fn leave(&mut self, group_ids: &[u64]) -> Result<(), TopoError> {
        let mut next = self.latest().clone();
        next.version += 1;
        for gid in group_ids {
            next.server_groups.remove(gid);
        }
        rebalance(&next.server_groups, &mut next.slots);
        self.push_config(next)
    }

    /// Read-only version lookup: non-positive or out-of-range versions
    /// resolve to the latest config.
    pub fn query(&self, version: i64) -> TopoConfig {
        if version <= 0 || version as usize >= self.configs.len() {
            return self.latest().clone();
        }
        self.configs[version as usize].clone()
    }
}

/// Deterministic slot rebalancing.
///
/// Orphaned slots (unassigned or owned by a departed group) go to the
/// least-loaded group first; then slots move one at a time from the most- to
/// the least-loaded group until the spread is at most one. Every choice is
/// tie-broken by ascending group id, so identical inputs always yield
/// identical ownership on every replica.
fn rebalance(groups: &BTreeMap<u64, Vec<String>>, slots: &mut [u64]) {
    if groups.is_empty() {
        for slot in slots.iter_mut() {
            *slot = UNASSIGNED;
        }
        return;
    }

    for slot in slots.iter_mut() {
        if *slot != UNASSIGNED && !groups.contains_key(slot) {
            *slot = UNASSIGNED;
        }
    }

    loop {
        let mut counts: BTreeMap<u64, usize> = groups.keys().map(|&gid| (gid, 0)).collect();
        for slot in slots.iter() {
            if *slot != UNASSIGNED {
                *counts.get_mut(slot).expect("owner is a live group") += 1;
            }
        }

        // BTreeMap iteration is gid-ascending, so min/max ties land on the
        // smallest gid
        let (&min_gid, &min_count) = counts
            .iter()
            .min_by_key(|(gid, count)| (**count, **gid))
            .expect("groups is non-empty");

        if let Some(pos) = slots.iter().position(|s| *s == UNASSIGNED) {
            slots[pos] = min_gid;
            continue;
        }

        let (&max_gid, &max_count) = counts
            .iter()
            .max_by_key(|(gid, count)| (**count, std::cmp::Reverse(**gid)))
            .expect("groups is non-empty");

        if max_count - min_count <= 1 {
            break;
        }
        let pos = slots
            .iter()
            .position(|s| *s == max_gid)
            .expect("max-loaded group owns a slot");
        slots[pos] = min_gid;
    }
}
