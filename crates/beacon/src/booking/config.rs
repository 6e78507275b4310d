// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Config subscription state.
//!
//! Config is delivered as full replacements only, so the merge engine is a
//! versioned swap: accept a document iff nothing has arrived yet or its
//! version is strictly newer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::DirtyCallback;
use crate::clock::now_millis;
use crate::event::{ConfigEvent, ConfigHandlerRef, EventHandler};
use crate::future::{Completion, StateFuture};
use crate::publisher::Publisher;
use crate::url::{ServiceUrl, UrlKey};

struct ConfigState {
    version: i64,
    full: bool,
    datum: Option<HashMap<String, String>>,
}

/// The merged state and fan-out point of one config subscription.
pub struct ConfigBooking {
    key: Arc<UrlKey>,
    publisher: Publisher<ConfigEvent>,
    future: StateFuture,
    state: Mutex<ConfigState>,
    last_event_time: AtomicI64,
    callback_id: Mutex<Option<String>>,
    dirty: Option<DirtyCallback>,
}

impl ConfigBooking {
    pub(crate) fn new(key: Arc<UrlKey>, dirty: Option<DirtyCallback>) -> Arc<Self> {
        Arc::new(Self {
            publisher: Publisher::start(key.key().to_string()),
            key,
            future: StateFuture::new(),
            state: Mutex::new(ConfigState {
                version: -1,
                full: false,
                datum: None,
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

    pub fn version(&self) -> i64 {
        self.state.lock().version
    }

    pub fn is_full(&self) -> bool {
        self.state.lock().full
    }

    /// Snapshot of the current config document.
    pub fn datum(&self) -> Option<HashMap<String, String>> {
        self.state.lock().datum.clone()
    }

    pub fn last_event_time(&self) -> i64 {
        self.last_event_time.load(Ordering::Relaxed)
    }

    pub fn open_completion(&self) -> Completion<ServiceUrl> {
        self.future.open()
    }

    pub fn close_completion(&self) -> Completion<ServiceUrl> {
        self.future.close_completion()
    }

    /// Whether this booking holds a document worth persisting.
    pub fn persistable(&self) -> bool {
        let state = self.state.lock();
        state.full && state.datum.is_some()
    }

    pub fn callback_id(&self) -> Option<String> {
        self.callback_id.lock().clone()
    }

    pub fn set_callback_id(&self, id: impl Into<String>) {
        *self.callback_id.lock() = Some(id.into());
    }

    /// Hook for staged delivery from several config sources.
    fn ready(&self) -> bool {
        true
    }

    /// Register a handler; late joiners get the current document at once.
    pub fn add_handler(&self, handler: ConfigHandlerRef) -> bool {
        match self.publisher.add_handler(handler) {
            None => false,
            Some(id) => {
                let event = {
                    let state = self.state.lock();
                    if state.full && self.ready() {
                        Some(ConfigEvent::new(
                            state.version,
                            state.datum.clone().unwrap_or_default(),
                        ))
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

    pub fn remove_handler(&self, handler: &ConfigHandlerRef) -> Option<usize> {
        self.publisher.remove_handler(handler)
    }

    pub fn handler_count(&self) -> usize {
        self.publisher.len()
    }

    pub fn close(&self) {
        self.future.close();
        self.publisher.close();
    }

    fn mark_dirty(&self) {
        if let Some(dirty) = &self.dirty {
            dirty();
        }
    }

    fn merge(&self, event: &ConfigEvent) {
        self.last_event_time.store(now_millis(), Ordering::Relaxed);
        let mut state = self.state.lock();
        if state.datum.is_some() && event.version <= state.version {
            return;
        }
        state.datum = Some(event.datum.clone());
        state.version = event.version;
        state.full = true;
        let outbound = if self.ready() {
            Some(ConfigEvent::new(state.version, event.datum.clone()))
        } else {
            None
        };
        drop(state);
        if let Some(outbound) = outbound {
            self.publisher.offer(outbound);
        }
        self.mark_dirty();
    }
}

impl EventHandler<ConfigEvent> for ConfigBooking {
    fn handle(&self, event: &ConfigEvent) {
        self.merge(event);
    }
}

impl std::fmt::Debug for ConfigBooking {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ConfigBooking")
            .field("key", &self.key.key())
            .field("version", &state.version)
            .field("full", &state.full)
            .field("entries", &state.datum.as_ref().map(HashMap::len))
            .finish()
    }
}
