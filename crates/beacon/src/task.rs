// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Retryable units of work and the dispatcher's deque.
//!
//! New user work is inserted at the head, retries and recovery re-issues at
//! the tail: at equal readiness, fresh intent always beats a stale retry.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::controller::RegistryController;
use crate::driver::RegistryDriver;
use crate::future::Completion;
use crate::url::ServiceUrl;

/// A task body. Runs on the dispatcher; returns false to be re-queued at
/// `now + task_retry_interval` (while the registry is open).
pub(crate) type TaskFn<D> =
    Box<dyn Fn(&Arc<RegistryController<D>>) -> bool + Send + Sync + 'static>;

/// One retryable unit of work (register, deregister, subscribe,
/// unsubscribe).
pub(crate) struct Task<D: RegistryDriver> {
    pub url: ServiceUrl,
    pub future: Completion<ServiceUrl>,
    pub retry_time: Instant,
    pub run: TaskFn<D>,
}

impl<D: RegistryDriver> Task<D> {
    pub fn new(
        url: ServiceUrl,
        future: Completion<ServiceUrl>,
        retry_time: Instant,
        run: TaskFn<D>,
    ) -> Self {
        Self {
            url,
            future,
            retry_time,
            run,
        }
    }
}

/// Where to insert a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// Fresh user work: preferred over anything equally due.
    Head,
    /// Retries and recovery re-issues: keep submission order.
    Tail,
}

/// Thread-safe double-ended task queue.
pub(crate) struct TaskQueue<D: RegistryDriver> {
    inner: Mutex<VecDeque<Task<D>>>,
}

impl<D: RegistryDriver> TaskQueue<D> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, task: Task<D>, placement: Placement) {
        let mut queue = self.inner.lock();
        match placement {
            Placement::Head => queue.push_front(task),
            Placement::Tail => queue.push_back(task),
        }
    }

    /// Retry time of the head task, if any.
    pub fn first_retry_time(&self) -> Option<Instant> {
        self.inner.lock().front().map(|t| t.retry_time)
    }

    /// Pop the head task. A concurrent head-insert may hand back a
    /// different task than the one just peeked; the dispatcher re-checks
    /// nothing and simply runs what it gets.
    pub fn poll_first(&self) -> Option<Task<D>> {
        self.inner.lock().pop_front()
    }

    /// Take everything (close path).
    pub fn drain(&self) -> Vec<Task<D>> {
        self.inner.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// A pending reconnect attempt with its not-before deadline.
pub(crate) struct ReconnectTask {
    pub future: Completion<()>,
    pub attempts: u64,
    pub max_retry_times: i32,
    pub deadline: Instant,
}

impl ReconnectTask {
    pub fn new(
        future: Completion<()>,
        attempts: u64,
        max_retry_times: i32,
        deadline: Instant,
    ) -> Self {
        Self {
            future,
            attempts,
            max_retry_times,
            deadline,
        }
    }

    /// Whether the deadline has passed and the attempt may run.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}
