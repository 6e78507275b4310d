// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process registry driver.
//!
//! A [`MemoryHub`] is a tiny registry living inside the process: a set of
//! registrations, versioned cluster and config tables, and the sinks
//! currently subscribed to each key. [`MemoryDriver`] adapts it to the
//! [`RegistryDriver`](super::RegistryDriver) trait.
//!
//! Useful for tests, demos, and single-process deployments that want the
//! full registry behavior (merge, recovery, backup) without a remote.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::DriverError;
use crate::event::{
    ClusterEvent, ClusterHandlerRef, ConfigEvent, ConfigHandlerRef, ShardEvent, ShardEventKind,
    UpdateKind,
};
use crate::shard::Shard;
use crate::url::UrlKey;

#[derive(Default)]
struct ClusterTable {
    version: i64,
    shards: HashMap<String, Shard>,
}

#[derive(Default)]
struct ConfigTable {
    version: i64,
    values: HashMap<String, String>,
}

/// The in-process registry state shared by any number of drivers.
#[derive(Default)]
pub struct MemoryHub {
    registrations: Mutex<HashSet<String>>,
    clusters: Mutex<HashMap<String, ClusterTable>>,
    configs: Mutex<HashMap<String, ConfigTable>>,
    cluster_sinks: Mutex<HashMap<String, Vec<ClusterHandlerRef>>>,
    config_sinks: Mutex<HashMap<String, Vec<ConfigHandlerRef>>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether a registration key is currently present.
    pub fn registered(&self, key: &str) -> bool {
        self.registrations.lock().contains(key)
    }

    /// Number of registrations.
    pub fn registration_count(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Apply a batch of shard changes to a cluster key, bump its version,
    /// and stream the event to every subscribed sink.
    pub fn push_cluster_event(&self, key: &str, kind: UpdateKind, shards: Vec<ShardEvent>) {
        let event = {
            let mut clusters = self.clusters.lock();
            let table = clusters.entry(key.to_string()).or_default();
            table.version += 1;
            if kind.is_full_datum() {
                table.shards.clear();
            }
            for shard_event in &shards {
                match shard_event.kind {
                    ShardEventKind::Add | ShardEventKind::Update => {
                        table
                            .shards
                            .insert(shard_event.shard.name.clone(), shard_event.shard.clone());
                    }
                    ShardEventKind::Delete => {
                        table.shards.remove(&shard_event.shard.name);
                    }
                }
            }
            ClusterEvent::new(kind, table.version, shards)
        };
        let sinks = {
            let map = self.cluster_sinks.lock();
            map.get(key).cloned().unwrap_or_default()
        };
        log::debug!(
            "[MemoryHub] {} sinks get {:?} v{} for '{}'",
            sinks.len(),
            event.kind,
            event.version,
            key
        );
        for sink in sinks {
            sink.handle(&event);
        }
    }

    /// Replace a config document, bump its version, and stream it out.
    pub fn set_config(&self, key: &str, values: HashMap<String, String>) {
        let event = {
            let mut configs = self.configs.lock();
            let table = configs.entry(key.to_string()).or_default();
            table.version += 1;
            table.values = values.clone();
            ConfigEvent::new(table.version, values)
        };
        let sinks = {
            let map = self.config_sinks.lock();
            map.get(key).cloned().unwrap_or_default()
        };
        for sink in sinks {
            sink.handle(&event);
        }
    }

    fn snapshot_cluster(&self, key: &str) -> ClusterEvent {
        let mut clusters = self.clusters.lock();
        let table = clusters.entry(key.to_string()).or_default();
        ClusterEvent::full(table.version, table.shards.values().cloned().collect())
    }

    fn snapshot_config(&self, key: &str) -> ConfigEvent {
        let mut configs = self.configs.lock();
        let table = configs.entry(key.to_string()).or_default();
        ConfigEvent::new(table.version, table.values.clone())
    }
}

/// [`RegistryDriver`](super::RegistryDriver) over a shared [`MemoryHub`].
#[derive(Clone)]
pub struct MemoryDriver {
    hub: Arc<MemoryHub>,
}

impl MemoryDriver {
    pub fn new(hub: Arc<MemoryHub>) -> Self {
        Self { hub }
    }

    pub fn hub(&self) -> &Arc<MemoryHub> {
        &self.hub
    }
}

impl super::RegistryDriver for MemoryDriver {
    async fn connect(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn register(&self, key: &UrlKey) -> Result<(), DriverError> {
        self.hub
            .registrations
            .lock()
            .insert(key.key().to_string());
        Ok(())
    }

    async fn deregister(&self, key: &UrlKey) -> Result<(), DriverError> {
        self.hub.registrations.lock().remove(key.key());
        Ok(())
    }

    async fn subscribe_cluster(
        &self,
        key: &UrlKey,
        sink: ClusterHandlerRef,
    ) -> Result<(), DriverError> {
        // Snapshot first so the sink starts from a full view, then attach
        // for the stream of later updates.
        let snapshot = self.hub.snapshot_cluster(key.key());
        sink.handle(&snapshot);
        self.hub
            .cluster_sinks
            .lock()
            .entry(key.key().to_string())
            .or_default()
            .push(sink);
        Ok(())
    }

    async fn unsubscribe_cluster(&self, key: &UrlKey) -> Result<(), DriverError> {
        self.hub.cluster_sinks.lock().remove(key.key());
        Ok(())
    }

    async fn subscribe_config(
        &self,
        key: &UrlKey,
        sink: ConfigHandlerRef,
    ) -> Result<(), DriverError> {
        let snapshot = self.hub.snapshot_config(key.key());
        sink.handle(&snapshot);
        self.hub
            .config_sinks
            .lock()
            .entry(key.key().to_string())
            .or_default()
            .push(sink);
        Ok(())
    }

    async fn unsubscribe_config(&self, key: &UrlKey) -> Result<(), DriverError> {
        self.hub.config_sinks.lock().remove(key.key());
        Ok(())
    }
}
