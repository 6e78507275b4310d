// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A single local service registration.
//!
//! The same service key may be registered from several places in a process
//! (multiple exports of one interface), so each entry carries a ref-count:
//! only the drop to zero removes the entry and deregisters remotely.

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::now_millis;
use crate::future::{Completion, StateFuture};
use crate::url::{ServiceUrl, UrlKey};

/// A ref-counted local registration.
///
/// The open completion settles when the remote acknowledges the
/// registration; the close completion when it acknowledges deregistration.
/// `close()` swaps in a fresh completion pair so a reopened registry hands
/// `recover()` pending futures to settle again.
pub struct Registration {
    key: Arc<UrlKey>,
    counter: AtomicI32,
    future: Mutex<StateFuture>,
    /// Wall-clock ms of the last successful remote registration; 0 before
    /// the first success and after close.
    register_time: AtomicI64,
}

impl Registration {
    pub fn new(key: Arc<UrlKey>) -> Self {
        Self {
            key,
            counter: AtomicI32::new(0),
            future: Mutex::new(StateFuture::new()),
            register_time: AtomicI64::new(0),
        }
    }

    pub fn key(&self) -> &Arc<UrlKey> {
        &self.key
    }

    pub fn url(&self) -> &ServiceUrl {
        self.key.url()
    }

    /// Bump the ref-count; returns the new value.
    pub fn add_ref(&self) -> i32 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Drop the ref-count; returns the new value.
    pub fn dec_ref(&self) -> i32 {
        self.counter.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn ref_count(&self) -> i32 {
        self.counter.load(Ordering::SeqCst)
    }

    /// The current open completion.
    pub fn open_completion(&self) -> Completion<ServiceUrl> {
        self.future.lock().open()
    }

    /// The current close completion.
    pub fn close_completion(&self) -> Completion<ServiceUrl> {
        self.future.lock().close_completion()
    }

    /// Whether the current session successfully registered this entry.
    pub fn registered(&self) -> bool {
        self.future.lock().open().is_success()
    }

    pub fn register_time(&self) -> i64 {
        self.register_time.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_registered(&self) {
        self.register_time.store(now_millis(), Ordering::SeqCst);
    }

    /// Close for this session: reset the register timestamp, fail a pending
    /// open completion, and swap in a fresh completion pair for a future
    /// reopen.
    pub fn close(&self) {
        self.register_time.store(0, Ordering::SeqCst);
        let old = std::mem::replace(&mut *self.future.lock(), StateFuture::new());
        old.close();
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.key.key())
            .field("refs", &self.ref_count())
            .field("register_time", &self.register_time())
            .finish()
    }
}
