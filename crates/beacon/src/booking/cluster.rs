// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cluster subscription state and its event-merge engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::DirtyCallback;
use crate::clock::now_millis;
use crate::event::{
    ClusterEvent, ClusterHandlerRef, EventHandler, ShardEvent, ShardEventKind, UpdateKind,
};
use crate::future::{Completion, StateFuture};
use crate::publisher::Publisher;
use crate::shard::Shard;
use crate::url::{ServiceUrl, UrlKey};

struct MergeState {
    /// Current data version; -1 before anything arrived. Never decreases.
    version: i64,
    /// Sticky full-snapshot flag. Written last on the transition so a
    /// reader never sees `full` with stale datum.
    full: bool,
    /// The merged full view, once any datum has been accepted.
    datum: Option<HashMap<String, Shard>>,
    /// Incremental events coalesced while waiting for the first snapshot,
    /// keyed by shard name (last writer wins). Released once full.
    pending: Option<HashMap<String, ShardEvent>>,
}

/// The merged state and fan-out point of one cluster subscription.
///
/// The booking is the event sink handed to the driver: inbound events enter
/// through [`EventHandler::handle`], are merged under the booking lock, and
/// coherent events leave through the publisher.
pub struct ClusterBooking {
    key: Arc<UrlKey>,
    publisher: Publisher<ClusterEvent>,
    future: StateFuture,
    state: Mutex<MergeState>,
    last_event_time: AtomicI64,
    /// Server-assigned callback handle for drivers that subscribe through
    /// registered callbacks rather than a held stream.
    callback_id: Mutex<Option<String>>,
    dirty: Option<DirtyCallback>,
}

impl ClusterBooking {
    pub(crate) fn new(key: Arc<UrlKey>, dirty: Option<DirtyCallback>) -> Arc<Self> {
        Arc::new(Self {
            publisher: Publisher::start(key.key().to_string()),
            key,
            future: StateFuture::new(),
            state: Mutex::new(MergeState {
                version: -1,
                full: false,
                datum: None,
                pending: None,
            }),
            last_event_time: AtomicI64::new(now_millis()),
            callback_id: Mutex::new(None),
            dirty,
        })
    }

    pub fn key(&self) -> &Arc<UrlKey> {
        &self.key
    }

    pub fn url(&self) -> &ServiceUrl {
        self.key.url()
    }

    /// Current data version (-1 before any event was accepted).
    pub fn version(&self) -> i64 {
        self.state.lock().version
    }

    /// Whether a full snapshot has been received.
    pub fn is_full(&self) -> bool {
        self.state.lock().full
    }

    /// Snapshot of the merged full view.
    pub fn datum(&self) -> Option<HashMap<String, Shard>> {
        self.state.lock().datum.clone()
    }

    /// Wall-clock ms of the last inbound event.
    pub fn last_event_time(&self) -> i64 {
        self.last_event_time.load(Ordering::Relaxed)
    }

    /// Settles when the remote acknowledges the subscription.
    pub fn open_completion(&self) -> Completion<ServiceUrl> {
        self.future.open()
    }

    /// Settles when the remote acknowledges the unsubscription.
    pub fn close_completion(&self) -> Completion<ServiceUrl> {
        self.future.close_completion()
    }

    /// Whether this booking holds a snapshot worth persisting.
    pub fn persistable(&self) -> bool {
        let state = self.state.lock();
        state.full && state.datum.as_ref().is_some_and(|d| !d.is_empty())
    }

    /// Driver-facing callback handle.
    pub fn callback_id(&self) -> Option<String> {
        self.callback_id.lock().clone()
    }

    pub fn set_callback_id(&self, id: impl Into<String>) {
        *self.callback_id.lock() = Some(id.into());
    }

    /// Hook for staged delivery: publish only once every source reported.
    fn ready(&self) -> bool {
        true
    }

    /// Register a handler. If a snapshot is already present the handler
    /// immediately receives a synthetic FULL event, alone.
    pub fn add_handler(&self, handler: ClusterHandlerRef) -> bool {
        match self.publisher.add_handler(handler) {
            None => false,
            Some(id) => {
                let event = {
                    let state = self.state.lock();
                    if state.full && self.ready() {
                        Some(Self::full_event(&state))
                    } else {
                        None
                    }
                };
                if let Some(event) = event {
                    self.publisher.offer_to(id, event);
                }
                true
            }
        }
    }

    /// Deregister a handler. Returns the number remaining, or `None` if it
    /// was not registered.
    pub fn remove_handler(&self, handler: &ClusterHandlerRef) -> Option<usize> {
        self.publisher.remove_handler(handler)
    }

    pub fn handler_count(&self) -> usize {
        self.publisher.len()
    }

    /// Tear down: fail a pending open completion and stop the publisher.
    pub fn close(&self) {
        self.future.close();
        self.publisher.close();
    }

    /// Synthesize a FULL event over the merged view.
    fn full_event(state: &MergeState) -> ClusterEvent {
        let shards = state
            .datum
            .as_ref()
            .map(|datum| datum.values().cloned().map(ShardEvent::add).collect())
            .unwrap_or_default();
        ClusterEvent::new(UpdateKind::Full, state.version, shards)
    }

    fn mark_dirty(&self) {
        if let Some(dirty) = &self.dirty {
            dirty();
        }
    }

    /// Apply shard events to a working view. Under protection, DELETE is
    /// checked against the shrinking view as it goes: a delete that would
    /// drop the last remaining shard is refused.
    fn apply(cluster: &mut HashMap<String, Shard>, events: &[ShardEvent], protect: bool) {
        for event in events {
            match event.kind {
                ShardEventKind::Add | ShardEventKind::Update => {
                    cluster.insert(event.shard.name.clone(), event.shard.clone());
                }
                ShardEventKind::Delete => {
                    if cluster.len() > 1 || !protect {
                        cluster.remove(&event.shard.name);
                    }
                }
            }
        }
    }

    fn merge(&self, event: &ClusterEvent) {
        self.last_event_time.store(now_millis(), Ordering::Relaxed);
        let is_full = event.kind.is_full_datum();
        let protect = event.kind.protect_null_datum(self.key.url());

        let mut state = self.state.lock();

        if !state.full && !is_full {
            // No snapshot yet: coalesce newer deltas, publish nothing.
            if event.version > state.version {
                let pending = state.pending.get_or_insert_with(HashMap::new);
                for shard_event in &event.shards {
                    pending.insert(shard_event.shard.name.clone(), shard_event.clone());
                }
                state.version = event.version;
            }
            return;
        }

        if state.full && state.version >= event.version {
            // Stale relative to the view handlers already saw.
            return;
        }

        let mut cluster = if !is_full {
            state.datum.clone().unwrap_or_default()
        } else {
            HashMap::new()
        };
        Self::apply(&mut cluster, &event.shards, protect);

        if state.full && cluster.is_empty() && protect {
            // Never downgrade an established view to empty under protection;
            // still acknowledge the version so the stream keeps moving.
            log::warn!(
                "[ClusterBooking] refusing empty datum for '{}' at version {}",
                self.key.key(),
                event.version
            );
            state.version = state.version.max(event.version);
            return;
        }

        if is_full && !state.full {
            // First snapshot. Deltas that accumulated beyond the snapshot's
            // version are newer than its base; replay them on top.
            if let Some(pending) = state.pending.take() {
                if state.version > event.version {
                    let replay: Vec<ShardEvent> = pending.into_values().collect();
                    Self::apply(&mut cluster, &replay, protect);
                }
            }
        }

        let was_full = state.full;
        state.datum = Some(cluster);
        state.version = state.version.max(event.version);
        if is_full && !state.full {
            // Last write of the transition: datum is already in place.
            state.full = true;
        }

        let outbound = if event.kind == UpdateKind::Clear {
            ClusterEvent::new(UpdateKind::Clear, state.version, event.shards.clone())
        } else if !was_full {
            Self::full_event(&state)
        } else {
            ClusterEvent::new(event.kind, state.version, event.shards.clone())
        };
        drop(state);

        self.publisher.offer(outbound);
        self.mark_dirty();
    }
}

impl EventHandler<ClusterEvent> for ClusterBooking {
    fn handle(&self, event: &ClusterEvent) {
        self.merge(event);
    }
}

impl std::fmt::Debug for ClusterBooking {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ClusterBooking")
            .field("key", &self.key.key())
            .field("version", &state.version)
            .field("full", &state.full)
            .field("shards", &state.datum.as_ref().map(HashMap::len))
            .finish()
    }
}
