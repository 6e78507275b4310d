// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared one-shot completions.
//!
//! A [`Completion`] is a first-write-wins result cell that any number of
//! clones can probe synchronously or await. It is the currency of the
//! registry API: `register()` hands every caller of the same key the same
//! completion, the dispatcher's continuation tasks settle it from another
//! task, and the close path fails whatever is still pending.
//!
//! Signaling rides on `tokio::sync::watch`, whose version counter makes the
//! check-then-wait loop race-free: a result stored between the probe and the
//! wait still flips `changed()`.

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::RegistryError;
use crate::url::ServiceUrl;

/// A shared, one-shot completion cell.
pub struct Completion<T> {
    inner: std::sync::Arc<Inner<T>>,
}

struct Inner<T> {
    cell: Mutex<Option<Result<T, RegistryError>>>,
    signal: watch::Sender<bool>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> Completion<T> {
    /// A pending completion.
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            inner: std::sync::Arc::new(Inner {
                cell: Mutex::new(None),
                signal,
            }),
        }
    }

    /// An already-succeeded completion.
    pub fn done(value: T) -> Self {
        let completion = Self::new();
        completion.complete(value);
        completion
    }

    /// An already-failed completion.
    pub fn failed(error: RegistryError) -> Self {
        let completion = Self::new();
        completion.fail(error);
        completion
    }

    /// Settle with a value. Returns false if already settled.
    pub fn complete(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Settle with an error. Returns false if already settled.
    pub fn fail(&self, error: RegistryError) -> bool {
        self.settle(Err(error))
    }

    fn settle(&self, result: Result<T, RegistryError>) -> bool {
        {
            let mut cell = self.inner.cell.lock();
            if cell.is_some() {
                return false;
            }
            *cell = Some(result);
        }
        // Wakes current waiters and bumps the version for future ones.
        self.inner.signal.send_replace(true);
        true
    }

    /// Whether the completion has settled.
    pub fn is_done(&self) -> bool {
        self.inner.cell.lock().is_some()
    }

    /// Whether the completion settled successfully.
    pub fn is_success(&self) -> bool {
        matches!(*self.inner.cell.lock(), Some(Ok(_)))
    }

    /// Snapshot of the result, if settled.
    pub fn peek(&self) -> Option<Result<T, RegistryError>> {
        self.inner.cell.lock().clone()
    }

    /// Wait for the completion to settle.
    pub async fn wait(&self) -> Result<T, RegistryError> {
        let mut rx = self.inner.signal.subscribe();
        loop {
            if let Some(result) = self.peek() {
                return result;
            }
            if rx.changed().await.is_err() {
                // The sender lives in our own Arc, so this cannot happen
                // while `self` exists; resolve defensively.
                return self.peek().unwrap_or(Err(RegistryError::AlreadyClosed));
            }
        }
    }
}

impl<T: Clone> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.inner.cell.lock() {
            None => "pending",
            Some(Ok(_)) => "ok",
            Some(Err(_)) => "err",
        };
        f.debug_struct("Completion").field("state", &state).finish()
    }
}

/// The open/close completion pair of a lifecycle-bearing entity
/// (registration or booking).
#[derive(Debug)]
pub struct StateFuture {
    open: Completion<ServiceUrl>,
    close: Completion<ServiceUrl>,
}

impl StateFuture {
    pub fn new() -> Self {
        Self {
            open: Completion::new(),
            close: Completion::new(),
        }
    }

    /// The completion that settles when the entity is established remotely.
    pub fn open(&self) -> Completion<ServiceUrl> {
        self.open.clone()
    }

    /// The completion that settles when the entity is torn down remotely.
    pub fn close_completion(&self) -> Completion<ServiceUrl> {
        self.close.clone()
    }

    /// Fail a still-pending open completion; settled completions are left
    /// untouched so "was ever established" stays readable.
    pub fn close(&self) {
        let _ = self.open.fail(RegistryError::AlreadyClosed);
    }
}

impl Default for StateFuture {
    fn default() -> Self {
        Self::new()
    }
}
