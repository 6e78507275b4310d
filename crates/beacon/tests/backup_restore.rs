// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Backup cadence and restore-on-open, end to end over the in-process
//! driver: subscription updates mark the snapshot dirty, the dispatcher
//! writes it on its next idle turn, and a fresh registry with the same name
//! sees the restored data at session start.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use beacon::{
    cluster_key, config_key, BackupStore, ClusterEvent, ConfigEvent, EventHandler,
    FileBackupStore, MemoryDriver, MemoryHub, Registry, ServiceUrl, Shard, ShardEvent, UpdateKind,
};

struct ClusterRecorder {
    seen: Mutex<Vec<ClusterEvent>>,
}

impl ClusterRecorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl EventHandler<ClusterEvent> for ClusterRecorder {
    fn handle(&self, event: &ClusterEvent) {
        self.seen.lock().push(event.clone());
    }
}

struct ConfigRecorder {
    seen: Mutex<Vec<ConfigEvent>>,
}

impl EventHandler<ConfigEvent> for ConfigRecorder {
    fn handle(&self, event: &ConfigEvent) {
        self.seen.lock().push(event.clone());
    }
}

fn service_url() -> ServiceUrl {
    "rpc://10.0.0.1:22000/demo.EchoService?alias=A&role=provider"
        .parse()
        .unwrap()
}

fn shard(name: &str) -> Shard {
    Shard::named(
        name,
        format!("rpc://{}/demo.EchoService", name).parse().unwrap(),
    )
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}

#[tokio::test]
async fn cluster_updates_flow_end_to_end() {
    let hub = MemoryHub::new();
    let url: ServiceUrl = "memory://hub?name=e2e".parse().unwrap();
    let registry = Registry::builder(url, MemoryDriver::new(hub.clone())).build();
    registry.open().wait().await.unwrap();

    let service = service_url();
    let recorder = ClusterRecorder::new();
    registry.subscribe_cluster(&service, recorder.clone());

    let key = cluster_key(&service);
    // subscribed once the driver acknowledged; the hub sink is attached
    wait_until(|| {
        registry
            .cluster_booking(&service)
            .is_some_and(|b| b.open_completion().is_success())
    })
    .await;

    hub.push_cluster_event(&key, UpdateKind::Add, vec![ShardEvent::add(shard("s1"))]);
    hub.push_cluster_event(&key, UpdateKind::Add, vec![ShardEvent::add(shard("s2"))]);

    wait_until(|| recorder.seen.lock().len() >= 3).await;
    let events = recorder.seen.lock().clone();
    assert_eq!(events[0].kind, UpdateKind::Full, "snapshot arrives first");
    assert_eq!(events[1].kind, UpdateKind::Add);
    assert_eq!(events[2].kind, UpdateKind::Add);

    let booking = registry.cluster_booking(&service).unwrap();
    assert_eq!(booking.datum().unwrap().len(), 2);

    registry.close().wait().await.unwrap();
}

#[tokio::test]
async fn dirty_bookings_are_backed_up_on_idle() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileBackupStore::new(dir.path()));
    let hub = MemoryHub::new();
    let url: ServiceUrl = "memory://hub?name=snap".parse().unwrap();
    let registry = Registry::builder(url, MemoryDriver::new(hub.clone()))
        .backup(store.clone())
        .build();
    registry.open().wait().await.unwrap();

    let service = service_url();
    let recorder = ClusterRecorder::new();
    registry.subscribe_cluster(&service, recorder);
    let config_recorder = Arc::new(ConfigRecorder {
        seen: Mutex::new(Vec::new()),
    });
    registry.subscribe_config(&service, config_recorder);

    let ckey = cluster_key(&service);
    wait_until(|| {
        registry
            .cluster_booking(&service)
            .is_some_and(|b| b.open_completion().is_success())
            && registry
                .config_booking(&service)
                .is_some_and(|b| b.open_completion().is_success())
    })
    .await;
    hub.push_cluster_event(&ckey, UpdateKind::Add, vec![ShardEvent::add(shard("s1"))]);
    hub.set_config(
        &config_key(&service),
        [("timeout".to_string(), "5000".to_string())].into(),
    );

    // the dispatcher writes the snapshot on its next idle turn; wait for
    // one that contains both updates (earlier snapshots may precede them)
    wait_until(|| {
        store.restore("snap").ok().flatten().is_some_and(|datum| {
            datum.clusters.get(&ckey).is_some_and(|s| !s.is_empty())
                && datum
                    .configs
                    .get(&config_key(&service))
                    .is_some_and(|c| c.contains_key("timeout"))
        })
    })
    .await;

    let datum = store.restore("snap").unwrap().unwrap();
    let shards = datum.clusters.get(&ckey).unwrap();
    assert_eq!(shards.len(), 1);
    assert_eq!(shards[0].name, "s1");
    let config = datum.configs.get(&config_key(&service)).unwrap();
    assert_eq!(config.get("timeout").map(String::as_str), Some("5000"));

    registry.close().wait().await.unwrap();
}

#[tokio::test]
async fn restored_snapshot_is_available_at_session_start() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileBackupStore::new(dir.path()));
    let hub = MemoryHub::new();
    let service = service_url();
    let ckey = cluster_key(&service);

    // first life: subscribe, receive a shard, get it persisted
    {
        let url: ServiceUrl = "memory://hub?name=boot".parse().unwrap();
        let registry = Registry::builder(url, MemoryDriver::new(hub.clone()))
            .backup(store.clone())
            .build();
        registry.open().wait().await.unwrap();
        let recorder = ClusterRecorder::new();
        registry.subscribe_cluster(&service, recorder);
        wait_until(|| {
            registry
                .cluster_booking(&service)
                .is_some_and(|b| b.open_completion().is_success())
        })
        .await;
        hub.push_cluster_event(&ckey, UpdateKind::Add, vec![ShardEvent::add(shard("s1"))]);
        wait_until(|| {
            store
                .restore("boot")
                .ok()
                .flatten()
                .is_some_and(|d| d.clusters.get(&ckey).is_some_and(|s| !s.is_empty()))
        })
        .await;
        registry.close().wait().await.unwrap();
    }

    // second life: the restored datum is parked on the controller for
    // drivers to seed initial views
    let url: ServiceUrl = "memory://hub?name=boot".parse().unwrap();
    let registry = Registry::builder(url, MemoryDriver::new(hub))
        .backup(store)
        .build();
    registry.open().wait().await.unwrap();
    wait_until(|| registry.restored_datum().is_some()).await;

    let restored = registry.restored_datum().unwrap();
    let shards = restored.clusters.get(&ckey).unwrap();
    assert_eq!(shards.len(), 1);
    assert_eq!(shards[0].to_shard().unwrap().name, "s1");

    registry.close().wait().await.unwrap();
}

#[tokio::test]
async fn config_document_reaches_handlers() {
    let hub = MemoryHub::new();
    let url: ServiceUrl = "memory://hub?name=cfg".parse().unwrap();
    let registry = Registry::builder(url, MemoryDriver::new(hub.clone())).build();
    registry.open().wait().await.unwrap();

    let service = service_url();
    let recorder = Arc::new(ConfigRecorder {
        seen: Mutex::new(Vec::new()),
    });
    registry.subscribe_config(&service, recorder.clone());
    wait_until(|| {
        registry
            .config_booking(&service)
            .is_some_and(|b| b.open_completion().is_success())
    })
    .await;

    hub.set_config(
        &config_key(&service),
        [("loadbalance".to_string(), "roundrobin".to_string())].into(),
    );

    wait_until(|| {
        recorder
            .seen
            .lock()
            .iter()
            .any(|e| e.datum.contains_key("loadbalance"))
    })
    .await;

    registry.close().wait().await.unwrap();
}
