// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The registry facade: user-facing API and lifecycle state machine.
//!
//! A [`Registry`] binds a driver, an optional backup store, and the user's
//! intent (registrations and subscriptions) to a sequence of sessions. Each
//! `open()` builds a fresh [`RegistryController`]; `close()` tears it down
//! and leaves the registry reopenable. Intent is owned here -- the
//! registrations map and the subscription sets survive sessions, which is
//! what lets `recover()` rebuild remote state after a reconnect or reopen.
//!
//! # Lifecycle
//!
//! ```text
//! Closed -> Opening -> Open -> Closing -> Closed -> ...
//! ```
//!
//! Operations invoked while Opening/Open are handed to the current
//! controller; while Closed they only update local intent, replayed by the
//! next open. Close is idempotent; open during close fails.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::backup::{BackupDatum, BackupStore};
use crate::booking::{ClusterBooking, ConfigBooking};
use crate::config::RegistryConfig;
use crate::controller::RegistryController;
use crate::driver::RegistryDriver;
use crate::error::RegistryError;
use crate::event::{ClusterHandlerRef, ConfigHandlerRef};
use crate::future::Completion;
use crate::registration::Registration;
use crate::url::{
    cluster_key, config_key, register_key, ServiceUrl, UrlKey, DATA_CENTER_OPTION, REGION_OPTION,
};

static REGISTRY_IDS: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Closed,
    Opening,
    Open,
    Closing,
}

/// A cluster subscription record: identity is key string plus handler
/// pointer.
#[derive(Clone)]
pub(crate) struct ClusterSubscription {
    pub(crate) key: Arc<UrlKey>,
    pub(crate) handler: ClusterHandlerRef,
}

/// A config subscription record.
#[derive(Clone)]
pub(crate) struct ConfigSubscription {
    pub(crate) key: Arc<UrlKey>,
    pub(crate) handler: ConfigHandlerRef,
}

struct StateInner<D: RegistryDriver> {
    status: Status,
    controller: Option<Arc<RegistryController<D>>>,
    open_future: Completion<()>,
    close_future: Completion<()>,
}

/// Builder for a [`Registry`].
pub struct RegistryBuilder<D: RegistryDriver> {
    url: ServiceUrl,
    name: Option<String>,
    driver: D,
    backup: Option<Arc<dyn BackupStore>>,
}

impl<D: RegistryDriver> RegistryBuilder<D> {
    pub fn new(url: ServiceUrl, driver: D) -> Self {
        Self {
            url,
            name: None,
            driver,
            backup: None,
        }
    }

    /// Override the logical name (defaults to the URL's `name` param, then
    /// its scheme).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach a backup store for cold-start snapshots.
    pub fn backup(mut self, store: Arc<dyn BackupStore>) -> Self {
        self.backup = Some(store);
        self
    }

    pub fn build(self) -> Arc<Registry<D>> {
        let mut config = RegistryConfig::from_url(&self.url);
        if let Some(name) = self.name {
            config.name = name;
        }
        Arc::new(Registry {
            id: REGISTRY_IDS.fetch_add(1, Ordering::Relaxed),
            url: self.url,
            config,
            driver: Arc::new(self.driver),
            backup: self.backup,
            registrations: Arc::new(DashMap::new()),
            clusters: Mutex::new(Vec::new()),
            configs: Mutex::new(Vec::new()),
            state: Mutex::new(StateInner {
                status: Status::Closed,
                controller: None,
                open_future: Completion::new(),
                close_future: Completion::new(),
            }),
        })
    }
}

/// Client-side handle to one remote registry.
pub struct Registry<D: RegistryDriver> {
    id: u64,
    url: ServiceUrl,
    config: RegistryConfig,
    driver: Arc<D>,
    backup: Option<Arc<dyn BackupStore>>,
    registrations: Arc<DashMap<String, Arc<Registration>>>,
    clusters: Mutex<Vec<ClusterSubscription>>,
    configs: Mutex<Vec<ConfigSubscription>>,
    state: Mutex<StateInner<D>>,
}

impl<D: RegistryDriver> Registry<D> {
    /// Start building a registry over `driver`.
    pub fn builder(url: ServiceUrl, driver: D) -> RegistryBuilder<D> {
        RegistryBuilder::new(url, driver)
    }

    /// Instance id, unique within the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn url(&self) -> &ServiceUrl {
        &self.url
    }

    /// Logical registry name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Region tag from the registry URL, empty when unset.
    pub fn region(&self) -> String {
        self.url.string_param(REGION_OPTION, "")
    }

    /// Data center tag from the registry URL, empty when unset.
    pub fn data_center(&self) -> String {
        self.url.string_param(DATA_CENTER_OPTION, "")
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Open the registry session.
    ///
    /// Idempotent: while Opening/Open every caller gets the same
    /// completion, which settles when the first connect succeeds or the
    /// connect retry budget is exhausted (the registry then returns to
    /// Closed). Must be called from within a tokio runtime.
    pub fn open(self: &Arc<Self>) -> Completion<()> {
        let (future, controller) = {
            let mut state = self.state.lock();
            match state.status {
                Status::Opening | Status::Open => return state.open_future.clone(),
                Status::Closing => return Completion::failed(RegistryError::AlreadyClosed),
                Status::Closed => {
                    state.status = Status::Opening;
                    state.open_future = Completion::new();
                    state.close_future = Completion::new();
                    let controller = RegistryController::new(self);
                    state.controller = Some(controller.clone());
                    (state.open_future.clone(), controller)
                }
            }
        };

        log::info!("[Registry] opening '{}' ({})", self.config.name, self.url);
        controller.seed_subscriptions();
        let connect = controller.open_session();

        let registry = self.clone();
        let open_future = future.clone();
        tokio::spawn(async move {
            match connect.wait().await {
                Ok(()) => {
                    {
                        let mut state = registry.state.lock();
                        if state.status == Status::Opening && registry.is_controller(&state, &controller)
                        {
                            state.status = Status::Open;
                        }
                    }
                    open_future.complete(());
                }
                Err(e) => {
                    log::error!("[Registry] open of '{}' failed: {}", registry.config.name, e);
                    {
                        let mut state = registry.state.lock();
                        if state.status == Status::Opening && registry.is_controller(&state, &controller)
                        {
                            state.status = Status::Closed;
                            state.controller = None;
                        }
                    }
                    controller.close_session().await;
                    open_future.fail(e);
                }
            }
        });
        future
    }

    /// Close the registry session.
    ///
    /// Idempotent: closing twice resolves both completions. Every
    /// registration's futures are bumped before the controller shutdown,
    /// and the registry is reopenable afterwards. Must be called from
    /// within a tokio runtime (unless already closed).
    pub fn close(self: &Arc<Self>) -> Completion<()> {
        let (future, controller) = {
            let mut state = self.state.lock();
            match state.status {
                Status::Closed => return Completion::done(()),
                Status::Closing => return state.close_future.clone(),
                Status::Opening | Status::Open => {
                    state.status = Status::Closing;
                    (state.close_future.clone(), state.controller.clone())
                }
            }
        };

        log::info!("[Registry] closing '{}'", self.config.name);
        for entry in self.registrations.iter() {
            entry.value().close();
        }

        let registry = self.clone();
        let close_future = future.clone();
        tokio::spawn(async move {
            if let Some(controller) = controller {
                controller.close_session().await;
            }
            {
                let mut state = registry.state.lock();
                state.status = Status::Closed;
                state.controller = None;
            }
            close_future.complete(());
        });
        future
    }

    // ------------------------------------------------------------------
    // Registrations
    // ------------------------------------------------------------------

    /// Declare that this process hosts `url`.
    ///
    /// Repeated registrations of the same key share one entry and bump its
    /// ref-count; the returned completion settles when the remote
    /// acknowledges (or immediately, if it already has).
    pub fn register(self: &Arc<Self>, url: &ServiceUrl) -> Completion<ServiceUrl> {
        use dashmap::mapref::entry::Entry;
        let key = register_key(url);
        let (registration, created) = match self.registrations.entry(key.clone()) {
            Entry::Occupied(e) => (e.get().clone(), false),
            Entry::Vacant(v) => {
                let registration =
                    Arc::new(Registration::new(Arc::new(UrlKey::new(url.clone(), key))));
                v.insert(registration.clone());
                (registration, true)
            }
        };
        registration.add_ref();
        if created {
            self.when_open(|controller| controller.register(&registration));
        }
        registration.open_completion()
    }

    /// Withdraw one reference to `url`'s registration.
    ///
    /// Only the drop to zero removes the entry and deregisters remotely,
    /// retried at most `max_retry_times` times. Calls that merely decrement
    /// get an already-settled completion.
    pub fn deregister(
        self: &Arc<Self>,
        url: &ServiceUrl,
        max_retry_times: i32,
    ) -> Completion<ServiceUrl> {
        let key = register_key(url);
        let removed = self.registrations.remove_if(&key, |_, reg| reg.dec_ref() <= 0);
        match removed {
            Some((_, registration)) => {
                let future = registration.close_completion();
                let delegated =
                    self.when_open(|controller| controller.deregister(&registration, max_retry_times));
                if !delegated {
                    future.complete(url.clone());
                }
                future
            }
            None => Completion::done(url.clone()),
        }
    }

    /// Current ref-count for `url`'s register key (0 when absent).
    pub fn ref_count(&self, url: &ServiceUrl) -> i32 {
        self.registrations
            .get(&register_key(url))
            .map(|r| r.ref_count())
            .unwrap_or(0)
    }

    /// The registration entry for `url`, if present.
    pub fn registration(&self, url: &ServiceUrl) -> Option<Arc<Registration>> {
        self.registrations
            .get(&register_key(url))
            .map(|r| Arc::clone(r.value()))
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Subscribe `handler` to cluster events for `url`. Returns false if
    /// this (url, handler) pair is already subscribed.
    pub fn subscribe_cluster(self: &Arc<Self>, url: &ServiceUrl, handler: ClusterHandlerRef) -> bool {
        let subscription = ClusterSubscription {
            key: Arc::new(UrlKey::cluster(url.clone())),
            handler,
        };
        {
            let mut subscriptions = self.clusters.lock();
            let duplicate = subscriptions.iter().any(|s| {
                s.key.key() == subscription.key.key() && Arc::ptr_eq(&s.handler, &subscription.handler)
            });
            if duplicate {
                return false;
            }
            subscriptions.push(subscription.clone());
        }
        self.when_open(|controller| controller.subscribe_cluster(&subscription));
        true
    }

    /// Remove a cluster subscription. Returns false if it was not present.
    pub fn unsubscribe_cluster(
        self: &Arc<Self>,
        url: &ServiceUrl,
        handler: &ClusterHandlerRef,
    ) -> bool {
        let key = cluster_key(url);
        let subscription = {
            let mut subscriptions = self.clusters.lock();
            let position = subscriptions
                .iter()
                .position(|s| s.key.key() == key && Arc::ptr_eq(&s.handler, handler));
            match position {
                Some(i) => subscriptions.swap_remove(i),
                None => return false,
            }
        };
        self.when_open(|controller| controller.unsubscribe_cluster(&subscription));
        true
    }

    /// Subscribe `handler` to config events for `url`. Returns false if
    /// this (url, handler) pair is already subscribed.
    pub fn subscribe_config(self: &Arc<Self>, url: &ServiceUrl, handler: ConfigHandlerRef) -> bool {
        let subscription = ConfigSubscription {
            key: Arc::new(UrlKey::config(url.clone())),
            handler,
        };
        {
            let mut subscriptions = self.configs.lock();
            let duplicate = subscriptions.iter().any(|s| {
                s.key.key() == subscription.key.key() && Arc::ptr_eq(&s.handler, &subscription.handler)
            });
            if duplicate {
                return false;
            }
            subscriptions.push(subscription.clone());
        }
        self.when_open(|controller| controller.subscribe_config(&subscription));
        true
    }

    /// Remove a config subscription. Returns false if it was not present.
    pub fn unsubscribe_config(
        self: &Arc<Self>,
        url: &ServiceUrl,
        handler: &ConfigHandlerRef,
    ) -> bool {
        let key = config_key(url);
        let subscription = {
            let mut subscriptions = self.configs.lock();
            let position = subscriptions
                .iter()
                .position(|s| s.key.key() == key && Arc::ptr_eq(&s.handler, handler));
            match position {
                Some(i) => subscriptions.swap_remove(i),
                None => return false,
            }
        };
        self.when_open(|controller| controller.unsubscribe_config(&subscription));
        true
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// The current session's merged cluster view for `url`, if subscribed.
    pub fn cluster_booking(&self, url: &ServiceUrl) -> Option<Arc<ClusterBooking>> {
        let controller = self.state.lock().controller.clone()?;
        controller.cluster_booking(&cluster_key(url))
    }

    /// The current session's config document for `url`, if subscribed.
    pub fn config_booking(&self, url: &ServiceUrl) -> Option<Arc<ConfigBooking>> {
        let controller = self.state.lock().controller.clone()?;
        controller.config_booking(&config_key(url))
    }

    /// Backup data restored at session start, for drivers seeding views.
    pub fn restored_datum(&self) -> Option<BackupDatum> {
        let controller = self.state.lock().controller.clone()?;
        controller.restored_datum()
    }

    // ------------------------------------------------------------------
    // Crate internals
    // ------------------------------------------------------------------

    pub(crate) fn driver(&self) -> Arc<D> {
        self.driver.clone()
    }

    pub(crate) fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub(crate) fn backup(&self) -> Option<Arc<dyn BackupStore>> {
        self.backup.clone()
    }

    pub(crate) fn registrations(&self) -> Arc<DashMap<String, Arc<Registration>>> {
        self.registrations.clone()
    }

    pub(crate) fn cluster_subscriptions(&self) -> Vec<ClusterSubscription> {
        self.clusters.lock().clone()
    }

    pub(crate) fn config_subscriptions(&self) -> Vec<ConfigSubscription> {
        self.configs.lock().clone()
    }

    /// Run `f` with the current controller iff the registry is Opening or
    /// Open. Reports whether it ran.
    fn when_open(&self, f: impl FnOnce(&Arc<RegistryController<D>>)) -> bool {
        let controller = {
            let state = self.state.lock();
            match state.status {
                Status::Opening | Status::Open => state.controller.clone(),
                _ => None,
            }
        };
        match controller {
            Some(controller) => {
                f(&controller);
                true
            }
            None => false,
        }
    }

    /// Whether `controller` is the live session of an open (or opening)
    /// registry. Stragglers from a replaced session fail this check.
    pub(crate) fn is_current_controller(&self, controller: &Arc<RegistryController<D>>) -> bool {
        let state = self.state.lock();
        matches!(state.status, Status::Opening | Status::Open)
            && self.is_controller(&state, controller)
    }

    fn is_controller(&self, state: &StateInner<D>, controller: &Arc<RegistryController<D>>) -> bool {
        state
            .controller
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, controller))
    }
}

impl<D: RegistryDriver> std::fmt::Debug for Registry<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("status", &self.state.lock().status)
            .field("registrations", &self.registrations.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MemoryDriver, MemoryHub};

    fn registry() -> Arc<Registry<MemoryDriver>> {
        let url: ServiceUrl = "memory://hub?name=test".parse().unwrap();
        Registry::builder(url, MemoryDriver::new(MemoryHub::new())).build()
    }

    fn service_url(alias: &str) -> ServiceUrl {
        ServiceUrl::new("rpc", "demo.EchoService")
            .with_param("alias", alias)
            .with_param("role", "provider")
    }

    #[test]
    fn builder_applies_name_override() {
        let url: ServiceUrl = "memory://hub".parse().unwrap();
        let registry = Registry::builder(url, MemoryDriver::new(MemoryHub::new()))
            .name("primary")
            .build();
        assert_eq!(registry.name(), "primary");
    }

    #[tokio::test]
    async fn register_before_open_only_records_intent() {
        let registry = registry();
        let future = registry.register(&service_url("A"));
        assert!(!future.is_done());
        assert_eq!(registry.ref_count(&service_url("A")), 1);
    }

    #[tokio::test]
    async fn register_twice_shares_the_entry() {
        let registry = registry();
        let first = registry.register(&service_url("A"));
        let second = registry.register(&service_url("A"));
        assert_eq!(registry.ref_count(&service_url("A")), 2);
        // same completion cell backs both
        first.complete(service_url("A"));
        assert!(second.is_done());
    }

    #[tokio::test]
    async fn deregister_without_registration_settles_immediately() {
        let registry = registry();
        let future = registry.deregister(&service_url("A"), 0);
        assert!(future.is_success());
    }

    #[tokio::test]
    async fn duplicate_subscription_is_rejected() {
        let registry = registry();
        struct Nop;
        impl crate::event::EventHandler<crate::event::ClusterEvent> for Nop {
            fn handle(&self, _event: &crate::event::ClusterEvent) {}
        }
        let handler: ClusterHandlerRef = Arc::new(Nop);
        assert!(registry.subscribe_cluster(&service_url("A"), handler.clone()));
        assert!(!registry.subscribe_cluster(&service_url("A"), handler.clone()));
        assert!(registry.unsubscribe_cluster(&service_url("A"), &handler));
        assert!(!registry.unsubscribe_cluster(&service_url("A"), &handler));
    }

    #[tokio::test]
    async fn close_when_never_opened_is_done() {
        let registry = registry();
        assert!(registry.close().is_success());
    }
}
