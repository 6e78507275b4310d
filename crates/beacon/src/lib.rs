// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Beacon - client-side service discovery registry
//!
//! Beacon keeps a process's service registrations, cluster subscriptions,
//! and configuration subscriptions synchronized with a remote registry
//! (ZooKeeper, etcd, Nacos, an HTTP naming service, ...) through a
//! pluggable [`RegistryDriver`]. It survives transient disconnects,
//! preserves user intent across reconnects, delivers consistent
//! full-then-incremental event streams to local handlers, and can persist
//! the last-known view to disk for cold-start bootstrap.
//!
//! ## Quick Start
//!
//! ```no_run
//! use beacon::{MemoryDriver, MemoryHub, Registry, ServiceUrl};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let url: ServiceUrl = "memory://hub?name=demo".parse()?;
//!     let registry = Registry::builder(url, MemoryDriver::new(MemoryHub::new())).build();
//!
//!     registry.open().wait().await?;
//!
//!     let service: ServiceUrl = "rpc://10.0.0.1:22000/demo.EchoService?alias=A&role=provider".parse()?;
//!     registry.register(&service).wait().await?;
//!
//!     registry.close().wait().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                        Registry (facade)                           |
//! |   open/close state machine | registrations | subscription sets     |
//! +--------------------------------------------------------------------+
//! |                  RegistryController (per session)                  |
//! |   task queue + dispatcher | reconnect loop | recover | backup      |
//! +--------------------------------------------------------------------+
//! |                  Bookings (per subscription)                       |
//! |   version merge engine | null protection | per-booking publisher   |
//! +--------------------------------------------------------------------+
//! |                     RegistryDriver (trait)                         |
//! |   connect/disconnect | register/deregister | subscribe streams     |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Registry`] | User API: open/close, register/deregister, subscribe |
//! | [`RegistryDriver`] | Transport boundary implemented per backend |
//! | [`ClusterEvent`] / [`ConfigEvent`] | What subscription handlers receive |
//! | [`Completion`] | Shared one-shot result of an async registry operation |
//! | [`BackupStore`] | Snapshot persistence for cold starts |
//! | [`MemoryDriver`] | In-process reference driver (tests, demos) |
//!
//! ## Guarantees
//!
//! - Per-key ref-counted registrations: the remote sees one registration
//!   no matter how many local exports share the key, withdrawn on the last
//!   deregister.
//! - Per-booking version monotonicity and sticky full snapshots: handlers
//!   never observe time going backwards, and never see partial state after
//!   the first snapshot.
//! - Fresh user work beats queued retries at equal readiness.
//! - Close is idempotent and bounded: it never waits on a slow remote.

/// Snapshot persistence for cold starts.
pub mod backup;
/// Controller-side subscription state and the event-merge engines.
pub mod booking;
/// Registry configuration derived from the URL.
pub mod config;
/// Driver trait and the in-process reference driver.
pub mod driver;
/// Error types.
pub mod error;
/// Event shapes and the handler trait.
pub mod event;
/// Shared one-shot completions.
pub mod future;
/// Per-booking event fan-out.
pub mod publisher;
/// Ref-counted local registrations.
pub mod registration;
/// The registry facade and its lifecycle state machine.
pub mod registry;
/// Shards: cluster member instances.
pub mod shard;
/// Service URLs, canonical keys, and URL option names.
pub mod url;

mod clock;
mod controller;
mod task;
mod waiter;

pub use backup::{BackupDatum, BackupStore, FileBackupStore, ShardRecord};
pub use booking::{ClusterBooking, ConfigBooking};
pub use config::{RegistryConfig, DEFAULT_TASK_RETRY_INTERVAL, RECONNECT_INTERVAL};
pub use driver::{MemoryDriver, MemoryHub, RegistryDriver};
pub use error::{DriverError, RegistryError, Result};
pub use event::{
    ClusterEvent, ClusterHandlerRef, ConfigEvent, ConfigHandlerRef, EventHandler, ShardEvent,
    ShardEventKind, UpdateKind,
};
pub use future::Completion;
pub use publisher::Publisher;
pub use registration::Registration;
pub use registry::{Registry, RegistryBuilder};
pub use shard::Shard;
pub use url::{cluster_key, config_key, register_key, ServiceUrl, UrlKey, GLOBAL_SETTING};

/// Beacon version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
