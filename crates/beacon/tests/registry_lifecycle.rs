// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry lifecycle scenarios: register/deregister semantics, ref-count
//! behavior, and close with in-flight driver work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use beacon::{
    ClusterEvent, ClusterHandlerRef, ConfigHandlerRef, DriverError, EventHandler, Registry,
    RegistryDriver, RegistryError, ServiceUrl, UrlKey,
};

/// Scripted driver: records calls, optionally hangs subscribes forever.
#[derive(Clone)]
struct MockDriver {
    state: Arc<MockState>,
}

struct MockState {
    calls: Mutex<Vec<String>>,
    hang_subscribes: AtomicBool,
}

impl MockDriver {
    fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                calls: Mutex::new(Vec::new()),
                hang_subscribes: AtomicBool::new(false),
            }),
        }
    }

    fn with_hanging_subscribes(self) -> Self {
        self.state.hang_subscribes.store(true, Ordering::SeqCst);
        self
    }

    fn record(&self, call: impl Into<String>) {
        self.state.calls.lock().push(call.into());
    }

    fn count(&self, prefix: &str) -> usize {
        self.state
            .calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

impl RegistryDriver for MockDriver {
    async fn connect(&self) -> Result<(), DriverError> {
        self.record("connect");
        Ok(())
    }

    async fn disconnect(&self) {
        self.record("disconnect");
    }

    async fn register(&self, key: &UrlKey) -> Result<(), DriverError> {
        self.record(format!("register {}", key.key()));
        Ok(())
    }

    async fn deregister(&self, key: &UrlKey) -> Result<(), DriverError> {
        self.record(format!("deregister {}", key.key()));
        Ok(())
    }

    async fn subscribe_cluster(
        &self,
        key: &UrlKey,
        _sink: ClusterHandlerRef,
    ) -> Result<(), DriverError> {
        self.record(format!("subscribe_cluster {}", key.key()));
        if self.state.hang_subscribes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn unsubscribe_cluster(&self, key: &UrlKey) -> Result<(), DriverError> {
        self.record(format!("unsubscribe_cluster {}", key.key()));
        Ok(())
    }

    async fn subscribe_config(
        &self,
        key: &UrlKey,
        _sink: ConfigHandlerRef,
    ) -> Result<(), DriverError> {
        self.record(format!("subscribe_config {}", key.key()));
        Ok(())
    }

    async fn unsubscribe_config(&self, key: &UrlKey) -> Result<(), DriverError> {
        self.record(format!("unsubscribe_config {}", key.key()));
        Ok(())
    }
}

struct NopHandler;

impl EventHandler<ClusterEvent> for NopHandler {
    fn handle(&self, _event: &ClusterEvent) {}
}

fn registry_url() -> ServiceUrl {
    "mock://remote?name=lifecycle".parse().unwrap()
}

fn service_url() -> ServiceUrl {
    "rpc://10.0.0.1:22000/demo.EchoService?alias=A&role=provider"
        .parse()
        .unwrap()
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
async fn simple_register_acks_once() {
    let driver = MockDriver::new();
    let registry = Registry::builder(registry_url(), driver.clone()).build();

    registry.open().wait().await.unwrap();

    let service = service_url();
    let resolved = registry.register(&service).wait().await.unwrap();
    assert_eq!(resolved, service);

    let registration = registry.registration(&service).unwrap();
    assert!(registration.register_time() > 0);
    assert_eq!(driver.count("register"), 1);

    registry.close().wait().await.unwrap();
}

#[tokio::test]
async fn register_is_ref_counted() {
    let driver = MockDriver::new();
    let registry = Registry::builder(registry_url(), driver.clone()).build();
    registry.open().wait().await.unwrap();

    let service = service_url();
    registry.register(&service).wait().await.unwrap();
    registry.register(&service).wait().await.unwrap();
    assert_eq!(registry.ref_count(&service), 2);
    assert_eq!(driver.count("register"), 1, "one remote registration");

    // first deregister only decrements
    registry.deregister(&service, 0).wait().await.unwrap();
    assert_eq!(registry.ref_count(&service), 1);
    assert_eq!(driver.count("deregister"), 0);

    // second removes the entry and withdraws remotely
    registry.deregister(&service, 0).wait().await.unwrap();
    assert_eq!(registry.ref_count(&service), 0);
    assert!(registry.registration(&service).is_none());
    assert_eq!(driver.count("deregister"), 1);

    registry.close().wait().await.unwrap();
}

#[tokio::test]
async fn repeated_register_shares_the_future() {
    let driver = MockDriver::new();
    let registry = Registry::builder(registry_url(), driver).build();
    registry.open().wait().await.unwrap();

    let service = service_url();
    let first = registry.register(&service);
    let second = registry.register(&service);
    first.wait().await.unwrap();
    // the second caller observes the same settled completion
    assert!(second.is_success());
    assert_eq!(registry.ref_count(&service), 2);

    registry.close().wait().await.unwrap();
}

#[tokio::test]
async fn close_fails_hung_subscription_within_bounded_time() {
    let driver = MockDriver::new().with_hanging_subscribes();
    let registry = Registry::builder(registry_url(), driver.clone()).build();
    registry.open().wait().await.unwrap();

    let service = service_url();
    let handler: ClusterHandlerRef = Arc::new(NopHandler);
    assert!(registry.subscribe_cluster(&service, handler));

    // the driver call is in flight and will never resolve
    wait_until(|| driver.count("subscribe_cluster") == 1).await;
    let booking = registry.cluster_booking(&service).unwrap();
    let pending = booking.open_completion();
    assert!(!pending.is_done());

    let closed = tokio::time::timeout(Duration::from_secs(5), registry.close().wait())
        .await
        .expect("close must not hang on a hung driver future");
    closed.unwrap();

    assert_eq!(pending.peek(), Some(Err(RegistryError::AlreadyClosed)));
    assert_eq!(driver.count("disconnect"), 1);
}

#[tokio::test]
async fn close_is_idempotent() {
    let driver = MockDriver::new();
    let registry = Registry::builder(registry_url(), driver).build();
    registry.open().wait().await.unwrap();

    let first = registry.close();
    let second = registry.close();
    first.wait().await.unwrap();
    second.wait().await.unwrap();
    // and once fully closed, another close settles immediately
    assert!(registry.close().is_success());
}

#[tokio::test]
async fn reopen_after_close_recovers_registrations() {
    let driver = MockDriver::new();
    let registry = Registry::builder(registry_url(), driver.clone()).build();

    registry.open().wait().await.unwrap();
    let service = service_url();
    registry.register(&service).wait().await.unwrap();
    registry.close().wait().await.unwrap();

    // the registration map survives the session; reopening replays it
    let reopened = registry.open();
    reopened.wait().await.unwrap();
    wait_until(|| driver.count("register") == 2).await;

    let registration = registry.registration(&service).unwrap();
    wait_until(|| registration.register_time() > 0).await;
    assert_eq!(driver.count("connect"), 2);

    registry.close().wait().await.unwrap();
}

#[tokio::test]
async fn subscribe_streams_after_open_and_unsubscribes_remotely() {
    let driver = MockDriver::new();
    let registry = Registry::builder(registry_url(), driver.clone()).build();
    registry.open().wait().await.unwrap();

    let service = service_url();
    let handler: ClusterHandlerRef = Arc::new(NopHandler);
    assert!(registry.subscribe_cluster(&service, handler.clone()));
    wait_until(|| driver.count("subscribe_cluster") == 1).await;

    let booking = registry.cluster_booking(&service).unwrap();
    booking.open_completion().wait().await.unwrap();

    assert!(registry.unsubscribe_cluster(&service, &handler));
    wait_until(|| driver.count("unsubscribe_cluster") == 1).await;
    assert!(registry.cluster_booking(&service).is_none());

    registry.close().wait().await.unwrap();
}

#[tokio::test]
async fn operations_after_close_stay_local() {
    let driver = MockDriver::new();
    let registry = Registry::builder(registry_url(), driver.clone()).build();
    registry.open().wait().await.unwrap();
    registry.close().wait().await.unwrap();

    let service = service_url();
    // intent is recorded but nothing reaches the driver
    let future = registry.register(&service);
    assert!(!future.is_done());
    assert_eq!(registry.ref_count(&service), 1);
    assert_eq!(driver.count("register"), 0);

    // deregistering while closed settles immediately
    registry.deregister(&service, 0).wait().await.unwrap();
    assert_eq!(registry.ref_count(&service), 0);
    assert_eq!(driver.count("deregister"), 0);
}
