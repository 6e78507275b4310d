// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dispatcher park/wake primitive.
//!
//! The dispatcher parks between turns for "until the earliest task is due"
//! and must be woken early by new work, a dirty flag, or shutdown. Built on
//! `tokio::sync::Notify`: a wakeup sent while the dispatcher is mid-turn is
//! stored as a permit and consumed by the next `wait`, so signals are never
//! lost.

use std::time::Duration;

use tokio::sync::Notify;

/// Single-consumer wakeup latch with timed wait.
#[derive(Debug, Default)]
pub(crate) struct Waiter {
    notify: Notify,
}

impl Waiter {
    pub fn new() -> Self {
        Self {
            notify: Notify::new(),
        }
    }

    /// Wake the waiting dispatcher, or arm a permit if it is mid-turn.
    pub fn wakeup(&self) {
        self.notify.notify_one();
    }

    /// Park until woken or until `timeout` elapses. Returns true if woken.
    pub async fn wait(&self, timeout: Duration) -> bool {
        tokio::select! {
            _ = self.notify.notified() => true,
            _ = tokio::time::sleep(timeout) => false,
        }
    }
}
