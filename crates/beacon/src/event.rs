// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cluster and config events and the handler trait.
//!
//! Drivers translate whatever their remote registry streams into
//! [`ClusterEvent`]s / [`ConfigEvent`]s and feed them into the booking they
//! were handed at subscribe time. The booking's merge engine then re-emits
//! coherent events to user handlers through its publisher.
//!
//! # Thread Safety
//!
//! Handlers are called from background tasks. They must be `Send + Sync`
//! and should not block; a panicking handler is isolated by the publisher
//! and does not affect other handlers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::shard::Shard;
use crate::url::{ServiceUrl, PROTECT_NULL_DATUM_OPTION};

/// Callback interface for registry events.
pub trait EventHandler<E>: Send + Sync {
    fn handle(&self, event: &E);
}

/// Shared handle to a cluster event handler.
pub type ClusterHandlerRef = Arc<dyn EventHandler<ClusterEvent>>;

/// Shared handle to a config event handler.
pub type ConfigHandlerRef = Arc<dyn EventHandler<ConfigEvent>>;

/// How a cluster event relates to the full dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Complete snapshot; replaces the current view.
    Full,
    /// Incremental additions.
    Add,
    /// Incremental updates.
    Update,
    /// Incremental removals.
    Delete,
    /// Complete replacement that may legitimately empty the cluster.
    ///
    /// A CLEAR is re-published to handlers with the event's own shard list
    /// rather than the merged view, matching the behavior downstream
    /// consumers were built against.
    Clear,
}

impl UpdateKind {
    /// Whether events of this kind carry a full dataset.
    pub fn is_full_datum(self) -> bool {
        matches!(self, Self::Full | Self::Clear)
    }

    /// Whether empty-cluster protection applies, given the subscription URL.
    ///
    /// Reads the `protectNullDatum` option (default true). CLEAR must be
    /// able to empty a cluster, so protection is always off for it.
    pub fn protect_null_datum(self, url: &ServiceUrl) -> bool {
        match self {
            Self::Clear => false,
            _ => url.bool_param(PROTECT_NULL_DATUM_OPTION, true),
        }
    }
}

/// What happened to a single shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardEventKind {
    Add,
    Update,
    Delete,
}

/// A change to a single shard.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardEvent {
    pub kind: ShardEventKind,
    pub shard: Shard,
}

impl ShardEvent {
    pub fn add(shard: Shard) -> Self {
        Self {
            kind: ShardEventKind::Add,
            shard,
        }
    }

    pub fn update(shard: Shard) -> Self {
        Self {
            kind: ShardEventKind::Update,
            shard,
        }
    }

    pub fn delete(shard: Shard) -> Self {
        Self {
            kind: ShardEventKind::Delete,
            shard,
        }
    }
}

/// A versioned batch of shard changes for one cluster subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterEvent {
    pub kind: UpdateKind,
    pub version: i64,
    pub shards: Vec<ShardEvent>,
}

impl ClusterEvent {
    pub fn new(kind: UpdateKind, version: i64, shards: Vec<ShardEvent>) -> Self {
        Self {
            kind,
            version,
            shards,
        }
    }

    /// A full snapshot event over the given shards.
    pub fn full(version: i64, shards: Vec<Shard>) -> Self {
        Self {
            kind: UpdateKind::Full,
            version,
            shards: shards.into_iter().map(ShardEvent::add).collect(),
        }
    }
}

/// A full-replacement configuration document for one config subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEvent {
    pub version: i64,
    pub datum: HashMap<String, String>,
}

impl ConfigEvent {
    pub fn new(version: i64, datum: HashMap<String, String>) -> Self {
        Self { version, datum }
    }
}
