// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The per-session registry controller.
//!
//! One controller is created per open/close cycle and owns everything that
//! dies with the session: the task queue, the dispatcher, the connected and
//! dirty flags, the pending reconnect attempt, the booking maps, and the
//! restored backup datum. The registrations map is shared with the facade
//! so intent survives across sessions and `recover()` can replay it.
//!
//! # Dispatcher
//!
//! A single spawned task serializes every register/deregister/subscribe/
//! unsubscribe attempt, runs due reconnect attempts while disconnected, and
//! writes the backup snapshot on idle turns when the dirty flag is set.
//! Driver futures are awaited on spawned continuations which re-enter the
//! controller through the task queue, so the dispatcher itself never blocks
//! on the network.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::backup::{BackupDatum, BackupStore, ShardRecord};
use crate::booking::{ClusterBooking, ConfigBooking, DirtyCallback};
use crate::config::{RegistryConfig, RECONNECT_INTERVAL};
use crate::driver::RegistryDriver;
use crate::error::RegistryError;
use crate::event::{ClusterHandlerRef, ConfigHandlerRef};
use crate::future::Completion;
use crate::registration::Registration;
use crate::registry::{ClusterSubscription, ConfigSubscription, Registry};
use crate::task::{Placement, ReconnectTask, Task, TaskFn, TaskQueue};
use crate::url::ServiceUrl;
use crate::waiter::Waiter;

/// Dispatcher park time when the queue is empty.
const IDLE_WAIT: Duration = Duration::from_secs(10);

/// Session-scoped controller binding the dispatcher, the driver, and the
/// booking maps together.
pub(crate) struct RegistryController<D: RegistryDriver> {
    registry: Weak<Registry<D>>,
    driver: Arc<D>,
    config: RegistryConfig,
    backup: Option<Arc<dyn BackupStore>>,
    /// Shared with the facade; survives this session.
    registrations: Arc<DashMap<String, Arc<Registration>>>,
    clusters: DashMap<String, Arc<ClusterBooking>>,
    configs: DashMap<String, Arc<ConfigBooking>>,
    tasks: TaskQueue<D>,
    waiter: Waiter,
    dirty: AtomicBool,
    connected: AtomicBool,
    stopped: AtomicBool,
    closing: AtomicBool,
    reconnect_task: Mutex<Option<ReconnectTask>>,
    restored: Mutex<Option<BackupDatum>>,
}

impl<D: RegistryDriver> RegistryController<D> {
    pub(crate) fn new(registry: &Arc<Registry<D>>) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::downgrade(registry),
            driver: registry.driver(),
            config: registry.config().clone(),
            backup: registry.backup(),
            registrations: registry.registrations(),
            clusters: DashMap::new(),
            configs: DashMap::new(),
            tasks: TaskQueue::new(),
            waiter: Waiter::new(),
            dirty: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            reconnect_task: Mutex::new(None),
            restored: Mutex::new(None),
        })
    }

    /// Adopt the subscriptions the facade already holds. Runs before the
    /// first connect, so no tasks are enqueued here; `recover()` issues
    /// them once the session is up.
    pub(crate) fn seed_subscriptions(self: &Arc<Self>) {
        if let Some(registry) = self.registry.upgrade() {
            for subscription in registry.cluster_subscriptions() {
                self.subscribe_cluster(&subscription);
            }
            for subscription in registry.config_subscriptions() {
                self.subscribe_config(&subscription);
            }
        }
    }

    /// Start the dispatcher and kick the first connect attempt. The
    /// returned completion settles when a connect succeeds or the retry
    /// budget runs out.
    pub(crate) fn open_session(self: &Arc<Self>) -> Completion<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.run().await });
        let future = Completion::new();
        self.reconnect(future.clone(), 0, self.config.max_connect_retry_times);
        future
    }

    /// Shut the session down: withdraw what this session established,
    /// disconnect, close remaining bookings, stop the dispatcher, and fail
    /// whatever work is left in the queue.
    pub(crate) async fn close_session(self: &Arc<Self>) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        for completion in self.unregister() {
            let _ = completion.wait().await;
        }
        self.driver.disconnect().await;

        let cluster_keys: Vec<String> = self.clusters.iter().map(|e| e.key().clone()).collect();
        for key in cluster_keys {
            if let Some((_, booking)) = self.clusters.remove(&key) {
                booking.close();
            }
        }
        let config_keys: Vec<String> = self.configs.iter().map(|e| e.key().clone()).collect();
        for key in config_keys {
            if let Some((_, booking)) = self.configs.remove(&key) {
                booking.close();
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
        self.waiter.wakeup();
        for task in self.tasks.drain() {
            task.future.fail(RegistryError::AlreadyClosed);
        }
        log::info!("[Registry] '{}' session closed", self.config.name);
    }

    // ------------------------------------------------------------------
    // Facade-facing operations
    // ------------------------------------------------------------------

    /// Issue an immediate register task. Skipped while disconnected:
    /// `recover()` replays the shared registrations map on connect.
    pub(crate) fn register(self: &Arc<Self>, registration: &Arc<Registration>) {
        if self.connected() {
            self.add_register_task(registration.clone(), Instant::now(), Placement::Head);
        }
    }

    /// Issue an immediate deregister task with a bounded retry budget.
    /// Always enqueued: the map entry is already gone, so recovery would
    /// never replay this intent.
    pub(crate) fn deregister(
        self: &Arc<Self>,
        registration: &Arc<Registration>,
        max_retry_times: i32,
    ) {
        self.add_deregister_task(
            registration.clone(),
            Instant::now(),
            0,
            max_retry_times,
            Placement::Head,
        );
    }

    pub(crate) fn subscribe_cluster(self: &Arc<Self>, subscription: &ClusterSubscription) {
        use dashmap::mapref::entry::Entry;
        let (booking, created) = match self.clusters.entry(subscription.key.key().to_string()) {
            Entry::Occupied(e) => (e.get().clone(), false),
            Entry::Vacant(v) => {
                let booking = ClusterBooking::new(subscription.key.clone(), self.dirty_callback());
                v.insert(booking.clone());
                (booking, true)
            }
        };
        booking.add_handler(subscription.handler.clone());
        if created && self.connected() {
            self.add_subscribe_cluster_task(booking, Instant::now(), Placement::Head);
        }
    }

    pub(crate) fn unsubscribe_cluster(self: &Arc<Self>, subscription: &ClusterSubscription) {
        let booking = match self.clusters.get(subscription.key.key()) {
            Some(entry) => Arc::clone(entry.value()),
            None => return,
        };
        if let Some(remaining) = booking.remove_handler(&subscription.handler) {
            if remaining == 0 {
                self.clusters.remove(subscription.key.key());
                let subscribed = booking.open_completion().is_success();
                booking.close();
                if subscribed {
                    self.add_unsubscribe_cluster_task(booking, Instant::now(), Placement::Head);
                }
            }
        }
    }

    pub(crate) fn subscribe_config(self: &Arc<Self>, subscription: &ConfigSubscription) {
        use dashmap::mapref::entry::Entry;
        let (booking, created) = match self.configs.entry(subscription.key.key().to_string()) {
            Entry::Occupied(e) => (e.get().clone(), false),
            Entry::Vacant(v) => {
                let booking = ConfigBooking::new(subscription.key.clone(), self.dirty_callback());
                v.insert(booking.clone());
                (booking, true)
            }
        };
        booking.add_handler(subscription.handler.clone());
        if created && self.connected() {
            self.add_subscribe_config_task(booking, Instant::now(), Placement::Head);
        }
    }

    pub(crate) fn unsubscribe_config(self: &Arc<Self>, subscription: &ConfigSubscription) {
        let booking = match self.configs.get(subscription.key.key()) {
            Some(entry) => Arc::clone(entry.value()),
            None => return,
        };
        if let Some(remaining) = booking.remove_handler(&subscription.handler) {
            if remaining == 0 {
                self.configs.remove(subscription.key.key());
                let subscribed = booking.open_completion().is_success();
                booking.close();
                if subscribed {
                    self.add_unsubscribe_config_task(booking, Instant::now(), Placement::Head);
                }
            }
        }
    }

    pub(crate) fn cluster_booking(&self, key: &str) -> Option<Arc<ClusterBooking>> {
        self.clusters.get(key).map(|e| Arc::clone(e.value()))
    }

    pub(crate) fn config_booking(&self, key: &str) -> Option<Arc<ConfigBooking>> {
        self.configs.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Backup data restored at session start, for drivers that seed views.
    pub(crate) fn restored_datum(&self) -> Option<BackupDatum> {
        self.restored.lock().clone()
    }

    // ------------------------------------------------------------------
    // Dispatcher
    // ------------------------------------------------------------------

    async fn run(self: Arc<Self>) {
        self.restore();
        log::debug!("[Dispatcher] '{}' started", self.config.name);
        loop {
            // Stop on close, or when the registry was dropped without one.
            if self.stopped.load(Ordering::SeqCst) || self.registry.strong_count() == 0 {
                break;
            }
            if !self.connected() && self.is_open() {
                let due = {
                    let mut slot = self.reconnect_task.lock();
                    if slot.as_ref().is_some_and(ReconnectTask::is_expired) {
                        slot.take()
                    } else {
                        None
                    }
                };
                if let Some(task) = due {
                    self.reconnect(task.future, task.attempts, task.max_retry_times);
                }
                self.waiter.wait(RECONNECT_INTERVAL).await;
            } else {
                let wait = self.execute_due();
                if !wait.is_zero() {
                    if self.backup.is_some()
                        && self
                            .dirty
                            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                            .is_ok()
                    {
                        self.backup_once();
                    }
                    self.waiter.wait(wait).await;
                }
            }
        }
        log::debug!("[Dispatcher] '{}' stopped", self.config.name);
    }

    /// Run the head task if it is due; otherwise report how long until it
    /// is (or the idle park time when the queue is empty).
    fn execute_due(self: &Arc<Self>) -> Duration {
        let wait = match self.tasks.first_retry_time() {
            Some(at) => at.duration_since(Instant::now()),
            None => IDLE_WAIT,
        };
        if wait.is_zero() {
            // A concurrent head-insert may hand us a different task than
            // the one just peeked; it is due either way.
            if let Some(task) = self.tasks.poll_first() {
                self.execute(task);
            }
            Duration::ZERO
        } else {
            wait
        }
    }

    fn execute(self: &Arc<Self>, mut task: Task<D>) {
        let ok = catch_unwind(AssertUnwindSafe(|| (task.run)(self))).unwrap_or_else(|_| {
            log::error!("[Dispatcher] task for '{}' panicked", task.url);
            false
        });
        if !ok {
            if self.is_open() {
                task.retry_time = Instant::now() + self.config.task_retry_interval;
                self.tasks.push(task, Placement::Tail);
            } else {
                task.future.fail(RegistryError::AlreadyClosed);
            }
        }
    }

    // ------------------------------------------------------------------
    // Connection management
    // ------------------------------------------------------------------

    fn reconnect(self: &Arc<Self>, future: Completion<()>, attempts: u64, max_retry_times: i32) {
        let ctrl = self.clone();
        tokio::spawn(async move {
            let result = ctrl.driver.connect().await;
            if !ctrl.is_open() {
                let driver = ctrl.driver.clone();
                tokio::spawn(async move { driver.disconnect().await });
                future.fail(RegistryError::AlreadyClosed);
                return;
            }
            match result {
                Err(e) => {
                    let count = attempts + 1;
                    let within_budget = max_retry_times < 0
                        || (max_retry_times > 0 && count <= max_retry_times as u64);
                    if within_budget {
                        log::error!(
                            "[Registry] error connecting '{}' (attempt {}), retry in {:?}: {}",
                            ctrl.config.name,
                            count,
                            RECONNECT_INTERVAL,
                            e
                        );
                        *ctrl.reconnect_task.lock() = Some(ReconnectTask::new(
                            future,
                            count,
                            max_retry_times,
                            Instant::now() + RECONNECT_INTERVAL,
                        ));
                    } else {
                        future.fail(RegistryError::ConnectFailed(e.to_string()));
                    }
                }
                Ok(()) => {
                    log::info!("[Registry] connected '{}'", ctrl.config.name);
                    ctrl.connected.store(true, Ordering::SeqCst);
                    ctrl.waiter.wakeup();
                    ctrl.recover();
                    future.complete(());
                }
            }
        });
    }

    /// Replay intent after a (re)connect: register everything in the shared
    /// map, then re-subscribe every booking. Tail-inserted so recovery runs
    /// in submission order while fresh user work still wins the head.
    fn recover(self: &Arc<Self>) {
        log::info!(
            "[Registry] '{}' recovering {} registrations, {} cluster and {} config subscriptions",
            self.config.name,
            self.registrations.len(),
            self.clusters.len(),
            self.configs.len()
        );
        for entry in self.registrations.iter() {
            self.add_register_task(entry.value().clone(), Instant::now(), Placement::Tail);
        }
        for entry in self.clusters.iter() {
            self.add_subscribe_cluster_task(entry.value().clone(), Instant::now(), Placement::Tail);
        }
        for entry in self.configs.iter() {
            self.add_subscribe_config_task(entry.value().clone(), Instant::now(), Placement::Tail);
        }
    }

    /// Close path: withdraw everything this session successfully
    /// established. Dispatches are fire-and-forget -- each close completion
    /// settles at dispatch so shutdown never waits on a slow remote.
    fn unregister(self: &Arc<Self>) -> Vec<Completion<ServiceUrl>> {
        let mut pending = Vec::new();
        for entry in self.registrations.iter() {
            let registration = entry.value().clone();
            if registration.registered() {
                pending.push(self.add_close_deregister_task(registration));
            }
        }
        for entry in self.clusters.iter() {
            let booking = entry.value().clone();
            if booking.open_completion().is_success() {
                pending.push(self.add_close_unsubscribe_cluster_task(booking));
            }
        }
        for entry in self.configs.iter() {
            let booking = entry.value().clone();
            if booking.open_completion().is_success() {
                pending.push(self.add_close_unsubscribe_config_task(booking));
            }
        }
        pending
    }

    // ------------------------------------------------------------------
    // Task builders
    // ------------------------------------------------------------------

    fn push_task(
        &self,
        url: ServiceUrl,
        future: Completion<ServiceUrl>,
        retry_time: Instant,
        placement: Placement,
        run: TaskFn<D>,
    ) {
        self.tasks
            .push(Task::new(url, future, retry_time, run), placement);
        self.waiter.wakeup();
    }

    fn add_register_task(
        self: &Arc<Self>,
        registration: Arc<Registration>,
        retry_time: Instant,
        placement: Placement,
    ) {
        let future = registration.open_completion();
        let url = registration.url().clone();
        let task_future = future.clone();
        let task_url = url.clone();
        let run: TaskFn<D> = Box::new(move |ctrl| {
            let key = registration.key().clone();
            if ctrl.is_open() && ctrl.registrations.contains_key(key.key()) {
                let ctrl = ctrl.clone();
                let registration = registration.clone();
                let future = future.clone();
                tokio::spawn(async move {
                    match ctrl.driver.register(&key).await {
                        Ok(()) => {
                            registration.mark_registered();
                            future.complete(key.url().clone());
                        }
                        Err(e) => {
                            if ctrl.is_open() && ctrl.registrations.contains_key(key.key()) {
                                log::warn!(
                                    "[Registry] register '{}' failed, retrying: {}",
                                    key.key(),
                                    e
                                );
                                let retry_at = Instant::now() + ctrl.config.task_retry_interval;
                                ctrl.add_register_task(registration, retry_at, Placement::Tail);
                            } else {
                                future.fail(e.into());
                            }
                        }
                    }
                });
            } else {
                // The entry raced away; resolve benignly.
                future.complete(url.clone());
            }
            true
        });
        self.push_task(task_url, task_future, retry_time, placement, run);
    }

    fn add_deregister_task(
        self: &Arc<Self>,
        registration: Arc<Registration>,
        retry_time: Instant,
        retries: i32,
        max_retry_times: i32,
        placement: Placement,
    ) {
        let future = registration.close_completion();
        let url = registration.url().clone();
        let task_future = future.clone();
        let task_url = url.clone();
        let run: TaskFn<D> = Box::new(move |ctrl| {
            let key = registration.key().clone();
            // Only deregister while the entry is really gone from the map;
            // a concurrent re-register supersedes this withdrawal.
            if !ctrl.registrations.contains_key(key.key()) {
                let ctrl = ctrl.clone();
                let registration = registration.clone();
                let future = future.clone();
                tokio::spawn(async move {
                    match ctrl.driver.deregister(&key).await {
                        Ok(()) => {
                            future.complete(key.url().clone());
                        }
                        Err(e) => {
                            if ctrl.driver.retry(&e)
                                && ctrl.is_open()
                                && !ctrl.registrations.contains_key(key.key())
                            {
                                let count = retries + 1;
                                if count > max_retry_times {
                                    future.fail(e.into());
                                } else {
                                    let retry_at =
                                        Instant::now() + ctrl.config.task_retry_interval;
                                    ctrl.add_deregister_task(
                                        registration,
                                        retry_at,
                                        count,
                                        max_retry_times,
                                        Placement::Tail,
                                    );
                                }
                            } else {
                                future.fail(e.into());
                            }
                        }
                    }
                });
            } else {
                future.complete(url.clone());
            }
            true
        });
        self.push_task(task_url, task_future, retry_time, placement, run);
    }

    fn add_subscribe_cluster_task(
        self: &Arc<Self>,
        booking: Arc<ClusterBooking>,
        retry_time: Instant,
        placement: Placement,
    ) {
        let future = booking.open_completion();
        let url = booking.url().clone();
        let task_future = future.clone();
        let task_url = url.clone();
        let run: TaskFn<D> = Box::new(move |ctrl| {
            let key = booking.key().clone();
            if ctrl.is_open() && ctrl.clusters.contains_key(key.key()) {
                let ctrl = ctrl.clone();
                let booking = booking.clone();
                let future = future.clone();
                tokio::spawn(async move {
                    let sink: ClusterHandlerRef = booking.clone();
                    match ctrl.driver.subscribe_cluster(&key, sink).await {
                        Ok(()) => {
                            future.complete(key.url().clone());
                        }
                        Err(e) => {
                            if ctrl.driver.retry(&e)
                                && ctrl.is_open()
                                && ctrl.clusters.contains_key(key.key())
                            {
                                log::warn!(
                                    "[Registry] cluster subscribe '{}' failed, retrying: {}",
                                    key.key(),
                                    e
                                );
                                let retry_at = Instant::now() + ctrl.config.task_retry_interval;
                                ctrl.add_subscribe_cluster_task(booking, retry_at, Placement::Tail);
                            } else {
                                future.fail(e.into());
                            }
                        }
                    }
                });
            } else {
                future.complete(url.clone());
            }
            true
        });
        self.push_task(task_url, task_future, retry_time, placement, run);
    }

    fn add_unsubscribe_cluster_task(
        self: &Arc<Self>,
        booking: Arc<ClusterBooking>,
        retry_time: Instant,
        placement: Placement,
    ) {
        let future = booking.close_completion();
        let url = booking.url().clone();
        let task_future = future.clone();
        let task_url = url.clone();
        let run: TaskFn<D> = Box::new(move |ctrl| {
            let key = booking.key().clone();
            if !ctrl.clusters.contains_key(key.key()) {
                let ctrl = ctrl.clone();
                let booking = booking.clone();
                let future = future.clone();
                tokio::spawn(async move {
                    match ctrl.driver.unsubscribe_cluster(&key).await {
                        Ok(()) => {
                            future.complete(key.url().clone());
                        }
                        Err(e) => {
                            if ctrl.driver.retry(&e)
                                && ctrl.is_open()
                                && !ctrl.clusters.contains_key(key.key())
                            {
                                let retry_at = Instant::now() + ctrl.config.task_retry_interval;
                                ctrl.add_unsubscribe_cluster_task(
                                    booking,
                                    retry_at,
                                    Placement::Tail,
                                );
                            } else {
                                future.fail(e.into());
                            }
                        }
                    }
                });
            } else {
                future.complete(url.clone());
            }
            true
        });
        self.push_task(task_url, task_future, retry_time, placement, run);
    }

    fn add_subscribe_config_task(
        self: &Arc<Self>,
        booking: Arc<ConfigBooking>,
        retry_time: Instant,
        placement: Placement,
    ) {
        let future = booking.open_completion();
        let url = booking.url().clone();
        let task_future = future.clone();
        let task_url = url.clone();
        let run: TaskFn<D> = Box::new(move |ctrl| {
            let key = booking.key().clone();
            if ctrl.is_open() && ctrl.configs.contains_key(key.key()) {
                let ctrl = ctrl.clone();
                let booking = booking.clone();
                let future = future.clone();
                tokio::spawn(async move {
                    let sink: ConfigHandlerRef = booking.clone();
                    match ctrl.driver.subscribe_config(&key, sink).await {
                        Ok(()) => {
                            future.complete(key.url().clone());
                        }
                        Err(e) => {
                            if ctrl.driver.retry(&e)
                                && ctrl.is_open()
                                && ctrl.configs.contains_key(key.key())
                            {
                                log::warn!(
                                    "[Registry] config subscribe '{}' failed, retrying: {}",
                                    key.key(),
                                    e
                                );
                                let retry_at = Instant::now() + ctrl.config.task_retry_interval;
                                ctrl.add_subscribe_config_task(booking, retry_at, Placement::Tail);
                            } else {
                                future.fail(e.into());
                            }
                        }
                    }
                });
            } else {
                future.complete(url.clone());
            }
            true
        });
        self.push_task(task_url, task_future, retry_time, placement, run);
    }

    fn add_unsubscribe_config_task(
        self: &Arc<Self>,
        booking: Arc<ConfigBooking>,
        retry_time: Instant,
        placement: Placement,
    ) {
        let future = booking.close_completion();
        let url = booking.url().clone();
        let task_future = future.clone();
        let task_url = url.clone();
        let run: TaskFn<D> = Box::new(move |ctrl| {
            let key = booking.key().clone();
            if !ctrl.configs.contains_key(key.key()) {
                let ctrl = ctrl.clone();
                let booking = booking.clone();
                let future = future.clone();
                tokio::spawn(async move {
                    match ctrl.driver.unsubscribe_config(&key).await {
                        Ok(()) => {
                            future.complete(key.url().clone());
                        }
                        Err(e) => {
                            if ctrl.driver.retry(&e)
                                && ctrl.is_open()
                                && !ctrl.configs.contains_key(key.key())
                            {
                                let retry_at = Instant::now() + ctrl.config.task_retry_interval;
                                ctrl.add_unsubscribe_config_task(booking, retry_at, Placement::Tail);
                            } else {
                                future.fail(e.into());
                            }
                        }
                    }
                });
            } else {
                future.complete(url.clone());
            }
            true
        });
        self.push_task(task_url, task_future, retry_time, placement, run);
    }

    fn add_close_deregister_task(
        self: &Arc<Self>,
        registration: Arc<Registration>,
    ) -> Completion<ServiceUrl> {
        let future = registration.close_completion();
        let url = registration.url().clone();
        let task_future = future.clone();
        let task_url = url.clone();
        let run: TaskFn<D> = Box::new(move |ctrl| {
            let key = registration.key().clone();
            let driver = ctrl.driver.clone();
            tokio::spawn(async move {
                if let Err(e) = driver.deregister(&key).await {
                    log::debug!(
                        "[Registry] close-time deregister '{}' failed: {}",
                        key.key(),
                        e
                    );
                }
            });
            future.complete(url.clone());
            true
        });
        self.push_task(
            task_url,
            task_future.clone(),
            Instant::now(),
            Placement::Head,
            run,
        );
        task_future
    }

    fn add_close_unsubscribe_cluster_task(
        self: &Arc<Self>,
        booking: Arc<ClusterBooking>,
    ) -> Completion<ServiceUrl> {
        let future = booking.close_completion();
        let url = booking.url().clone();
        let task_future = future.clone();
        let task_url = url.clone();
        let run: TaskFn<D> = Box::new(move |ctrl| {
            let key = booking.key().clone();
            let driver = ctrl.driver.clone();
            tokio::spawn(async move {
                if let Err(e) = driver.unsubscribe_cluster(&key).await {
                    log::debug!(
                        "[Registry] close-time unsubscribe '{}' failed: {}",
                        key.key(),
                        e
                    );
                }
            });
            future.complete(url.clone());
            true
        });
        self.push_task(
            task_url,
            task_future.clone(),
            Instant::now(),
            Placement::Head,
            run,
        );
        task_future
    }

    fn add_close_unsubscribe_config_task(
        self: &Arc<Self>,
        booking: Arc<ConfigBooking>,
    ) -> Completion<ServiceUrl> {
        let future = booking.close_completion();
        let url = booking.url().clone();
        let task_future = future.clone();
        let task_url = url.clone();
        let run: TaskFn<D> = Box::new(move |ctrl| {
            let key = booking.key().clone();
            let driver = ctrl.driver.clone();
            tokio::spawn(async move {
                if let Err(e) = driver.unsubscribe_config(&key).await {
                    log::debug!(
                        "[Registry] close-time unsubscribe '{}' failed: {}",
                        key.key(),
                        e
                    );
                }
            });
            future.complete(url.clone());
            true
        });
        self.push_task(
            task_url,
            task_future.clone(),
            Instant::now(),
            Placement::Head,
            run,
        );
        task_future
    }

    // ------------------------------------------------------------------
    // Backup
    // ------------------------------------------------------------------

    fn restore(&self) {
        let Some(store) = &self.backup else { return };
        match store.restore(&self.config.name) {
            Ok(Some(datum)) => {
                log::info!(
                    "[Backup] restored '{}': {} clusters, {} configs",
                    self.config.name,
                    datum.clusters.len(),
                    datum.configs.len()
                );
                *self.restored.lock() = Some(datum);
            }
            Ok(None) => {}
            Err(e) => {
                log::error!("[Backup] restore of '{}' failed: {}", self.config.name, e);
            }
        }
    }

    fn backup_once(&self) {
        let Some(store) = &self.backup else { return };
        let mut datum = BackupDatum::default();
        for entry in self.clusters.iter() {
            let booking = entry.value();
            if booking.persistable() {
                if let Some(shards) = booking.datum() {
                    datum.clusters.insert(
                        entry.key().clone(),
                        shards.values().map(ShardRecord::from_shard).collect(),
                    );
                }
            }
        }
        for entry in self.configs.iter() {
            let booking = entry.value();
            if booking.persistable() {
                if let Some(values) = booking.datum() {
                    datum.configs.insert(entry.key().clone(), values);
                }
            }
        }
        if let Err(e) = store.backup(&self.config.name, &datum) {
            log::error!("[Backup] backup of '{}' failed: {}", self.config.name, e);
        } else {
            log::debug!(
                "[Backup] '{}' wrote {} clusters, {} configs",
                self.config.name,
                datum.clusters.len(),
                datum.configs.len()
            );
        }
    }

    /// Booking callback: the on-disk snapshot is stale.
    fn mark_dirty(&self) {
        if self.backup.is_some() {
            self.dirty.store(true, Ordering::SeqCst);
            self.waiter.wakeup();
        }
    }

    fn dirty_callback(self: &Arc<Self>) -> Option<DirtyCallback> {
        self.backup.as_ref()?;
        let weak = Arc::downgrade(self);
        Some(Arc::new(move || {
            if let Some(ctrl) = weak.upgrade() {
                ctrl.mark_dirty();
            }
        }))
    }

    // ------------------------------------------------------------------
    // State probes
    // ------------------------------------------------------------------

    /// Whether this controller is still the facade's current session and
    /// the registry has not begun closing.
    pub(crate) fn is_open(self: &Arc<Self>) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.is_current_controller(self),
            None => false,
        }
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
