// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bookings: the controller-side shadow of a subscription.
//!
//! A booking owns the merged state of one cluster or config subscription --
//! current version, whether a full snapshot has arrived, the full dataset
//! view -- plus the publisher that fans re-emitted events out to user
//! handlers. Drivers push raw registry events into the booking (it is the
//! sink handed to `subscribe_*`); the merge engine reconciles them into a
//! coherent full-then-incremental stream.
//!
//! # Merge contract
//!
//! - `version` never decreases; events at or below the current version of a
//!   full view are dropped as stale.
//! - `full` is sticky: once a snapshot has been seen the booking never
//!   reports partial state again.
//! - Incremental events that arrive before the first snapshot are coalesced
//!   and replayed on top of an older snapshot when it lands.
//! - A handler that joins after the snapshot immediately receives a
//!   synthetic FULL event, and only that handler.

mod cluster;
mod config;

pub use cluster::ClusterBooking;
pub use config::ConfigBooking;

use std::sync::Arc;

/// Callback into the controller marking the backup snapshot stale. Only
/// wired when a backup store is configured.
pub(crate) type DirtyCallback = Arc<dyn Fn() + Send + Sync>;
