// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The transport boundary: concrete registries implement [`RegistryDriver`].
//!
//! A driver owns the wire protocol to one remote registry (ZooKeeper, etcd,
//! Nacos, an HTTP naming service, ...). The controller never touches the
//! network itself: it calls these hooks, awaits their futures on spawned
//! continuations, and feeds inbound registry events into the sink it handed
//! to `subscribe_*` (the booking).
//!
//! # Contract
//!
//! - Every hook must be non-blocking: return a future, do the work there.
//! - `connect` must be idempotent against redundant opens.
//! - `disconnect` never fails the caller; log problems inside.
//! - Event routing: after `subscribe_cluster(key, sink)` resolves, the
//!   driver delivers every inbound event for `key` to `sink.handle(..)`
//!   until the matching `unsubscribe_cluster` resolves.

pub mod memory;

pub use memory::{MemoryDriver, MemoryHub};

use std::future::Future;

use crate::error::DriverError;
use crate::event::{ClusterHandlerRef, ConfigHandlerRef};
use crate::url::UrlKey;

/// Backend-agnostic interface to a remote service registry.
pub trait RegistryDriver: Send + Sync + 'static {
    /// Establish the registry session.
    fn connect(&self) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Tear the session down. Must not fail; errors are logged inside.
    fn disconnect(&self) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Transmit a registration; resolve when the remote acknowledges.
    fn register(&self, key: &UrlKey) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Withdraw a registration; resolve when the remote acknowledges.
    fn deregister(&self, key: &UrlKey) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Ask the remote to stream cluster events for `key` into `sink`.
    fn subscribe_cluster(
        &self,
        key: &UrlKey,
        sink: ClusterHandlerRef,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Stop the cluster stream for `key`.
    fn unsubscribe_cluster(
        &self,
        key: &UrlKey,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Ask the remote to stream config events for `key` into `sink`.
    fn subscribe_config(
        &self,
        key: &UrlKey,
        sink: ConfigHandlerRef,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Stop the config stream for `key`.
    fn unsubscribe_config(
        &self,
        key: &UrlKey,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Retry policy: should the controller retry after `error`?
    ///
    /// Defaults to true for everything, which keeps a flaky remote from
    /// shedding state but also retries rejections that will never succeed
    /// (an auth failure, say). Drivers that can tell the difference should
    /// override this.
    fn retry(&self, error: &DriverError) -> bool {
        let _ = error;
        true
    }
}
