// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-booking event fan-out bus.
//!
//! One publisher per booking: producers (the merge engine) enqueue events,
//! a dedicated drain task delivers them to every registered handler in FIFO
//! order. Deliveries are either broadcast or addressed to a single handler
//! -- the latter carries the synthetic FULL event a late-joining handler
//! receives.
//!
//! # Thread Safety
//!
//! Handlers run on the drain task, never with booking locks held. A
//! panicking handler is caught and logged; it does not affect other
//! handlers or the producer.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::event::EventHandler;

enum Delivery<E> {
    Broadcast(E),
    Direct(u64, E),
}

struct HandlerEntry<E> {
    id: u64,
    handler: Arc<dyn EventHandler<E>>,
}

/// Fan-out bus with FIFO delivery and targeted one-shot delivery.
pub struct Publisher<E> {
    name: String,
    handlers: Arc<Mutex<Vec<HandlerEntry<E>>>>,
    sender: Mutex<Option<mpsc::UnboundedSender<Delivery<E>>>>,
    next_id: AtomicU64,
}

impl<E: Send + 'static> Publisher<E> {
    /// Create the publisher and spawn its drain task. The task exits once
    /// the publisher is closed and the queue has drained.
    pub fn start(name: impl Into<String>) -> Self {
        let name = name.into();
        let handlers: Arc<Mutex<Vec<HandlerEntry<E>>>> = Arc::new(Mutex::new(Vec::new()));
        let (sender, mut receiver) = mpsc::unbounded_channel();

        let drain_handlers = handlers.clone();
        let drain_name = name.clone();
        tokio::spawn(async move {
            while let Some(delivery) = receiver.recv().await {
                // Snapshot entries so no lock is held across handler calls.
                let entries: Vec<(u64, Arc<dyn EventHandler<E>>)> = drain_handlers
                    .lock()
                    .iter()
                    .map(|e| (e.id, e.handler.clone()))
                    .collect();
                match delivery {
                    Delivery::Broadcast(event) => {
                        for (_, handler) in &entries {
                            dispatch(&drain_name, handler, &event);
                        }
                    }
                    Delivery::Direct(id, event) => {
                        if let Some((_, handler)) = entries.iter().find(|(eid, _)| *eid == id) {
                            dispatch(&drain_name, handler, &event);
                        }
                    }
                }
            }
            log::debug!("[Publisher] '{}' drained and stopped", drain_name);
        });

        Self {
            name,
            handlers,
            sender: Mutex::new(Some(sender)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler. Returns its delivery id, or `None` if the same
    /// handler (pointer identity) is already registered.
    pub fn add_handler(&self, handler: Arc<dyn EventHandler<E>>) -> Option<u64> {
        let mut handlers = self.handlers.lock();
        if handlers.iter().any(|e| Arc::ptr_eq(&e.handler, &handler)) {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        handlers.push(HandlerEntry { id, handler });
        Some(id)
    }

    /// Deregister a handler by pointer identity. Returns the number of
    /// handlers remaining, or `None` if it was not registered.
    pub fn remove_handler(&self, handler: &Arc<dyn EventHandler<E>>) -> Option<usize> {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|e| !Arc::ptr_eq(&e.handler, handler));
        if handlers.len() == before {
            None
        } else {
            Some(handlers.len())
        }
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Broadcast an event to all handlers. Returns false if closed.
    pub fn offer(&self, event: E) -> bool {
        match &*self.sender.lock() {
            Some(sender) => sender.send(Delivery::Broadcast(event)).is_ok(),
            None => false,
        }
    }

    /// Deliver an event to one handler only. Returns false if closed.
    pub fn offer_to(&self, id: u64, event: E) -> bool {
        match &*self.sender.lock() {
            Some(sender) => sender.send(Delivery::Direct(id, event)).is_ok(),
            None => false,
        }
    }

    /// Close the bus. Queued events still drain; later offers are dropped.
    pub fn close(&self) {
        self.sender.lock().take();
        self.handlers.lock().clear();
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn dispatch<E>(name: &str, handler: &Arc<dyn EventHandler<E>>, event: &E) {
    if catch_unwind(AssertUnwindSafe(|| handler.handle(event))).is_err() {
        log::warn!("[Publisher] handler panicked on '{}'", name);
    }
}

impl<E> std::fmt::Debug for Publisher<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("name", &self.name)
            .field("handlers", &self.handlers.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Recorder {
        seen: Mutex<Vec<u32>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl EventHandler<u32> for Recorder {
        fn handle(&self, event: &u32) {
            self.seen.lock().push(*event);
        }
    }

    async fn settle() {
        // Give the drain task time to deliver.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn broadcast_is_fifo_per_handler() {
        let publisher: Publisher<u32> = Publisher::start("test");
        let recorder = Recorder::new();
        publisher.add_handler(recorder.clone()).unwrap();
        for i in 0..10 {
            assert!(publisher.offer(i));
        }
        settle().await;
        assert_eq!(*recorder.seen.lock(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn direct_delivery_targets_one_handler() {
        let publisher: Publisher<u32> = Publisher::start("test");
        let a = Recorder::new();
        let b = Recorder::new();
        let id_a = publisher.add_handler(a.clone()).unwrap();
        publisher.add_handler(b.clone()).unwrap();
        publisher.offer_to(id_a, 42);
        settle().await;
        assert_eq!(*a.seen.lock(), vec![42]);
        assert!(b.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn duplicate_handler_rejected() {
        let publisher: Publisher<u32> = Publisher::start("test");
        let recorder = Recorder::new();
        assert!(publisher.add_handler(recorder.clone()).is_some());
        assert!(publisher.add_handler(recorder.clone()).is_none());
        assert_eq!(publisher.len(), 1);
    }

    #[tokio::test]
    async fn remove_handler_reports_remaining() {
        let publisher: Publisher<u32> = Publisher::start("test");
        let a = Recorder::new();
        let b = Recorder::new();
        publisher.add_handler(a.clone());
        publisher.add_handler(b.clone());
        let a_ref: Arc<dyn EventHandler<u32>> = a.clone();
        assert_eq!(publisher.remove_handler(&a_ref), Some(1));
        assert_eq!(publisher.remove_handler(&a_ref), None);
    }

    struct Panicker;

    impl EventHandler<u32> for Panicker {
        fn handle(&self, _event: &u32) {
            panic!("handler bug");
        }
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stop_others() {
        let publisher: Publisher<u32> = Publisher::start("test");
        publisher.add_handler(Arc::new(Panicker));
        let recorder = Recorder::new();
        publisher.add_handler(recorder.clone());
        publisher.offer(1);
        publisher.offer(2);
        settle().await;
        assert_eq!(*recorder.seen.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn closed_publisher_drops_offers() {
        let publisher: Publisher<u32> = Publisher::start("test");
        let recorder = Recorder::new();
        publisher.add_handler(recorder.clone());
        publisher.close();
        assert!(!publisher.offer(1));
        settle().await;
        assert!(recorder.seen.lock().is_empty());
    }
}
