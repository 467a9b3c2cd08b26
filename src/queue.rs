//! A bounded, multi-producer multi-consumer FIFO queue used to hand work between the
//! reader, worker, and sender thread pools.
//!
//! `take` blocks until an item is available or the queue is shut down, at which point it
//! drains whatever is left before finally returning `None`. This lets a pool finish work
//! that was already queued at shutdown time instead of dropping it on the floor.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct Inner<T> {
    items: VecDeque<T>,
    capacity: Option<usize>,
    shutting_down: bool,
}

pub struct WorkQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> WorkQueue<T> {
    /// `capacity = None` means unbounded; `offer` never blocks.
    pub fn new(capacity: Option<usize>) -> Self {
        WorkQueue {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                capacity,
                shutting_down: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Push an item, blocking if the queue is at capacity. A no-op push during shutdown
    /// still succeeds (the item is simply dropped once popped) so callers don't need to
    /// special-case the race between enqueue and shutdown.
    pub fn offer(&self, item: T) {
        let mut guard = self.inner.lock();
        if let Some(cap) = guard.capacity {
            self.not_full
                .wait_while(&mut guard, |inner| inner.items.len() >= cap && !inner.shutting_down);
        }
        guard.items.push_back(item);
        drop(guard);
        self.not_empty.notify_one();
    }

    /// Block until an item is available, or `None` once the queue has been shut down and
    /// drained.
    pub fn take(&self) -> Option<T> {
        let mut guard = self.inner.lock();
        self.not_empty
            .wait_while(&mut guard, |inner| inner.items.is_empty() && !inner.shutting_down);
        let item = guard.items.pop_front();
        drop(guard);
        self.not_full.notify_one();
        item
    }

    /// Mark the queue as shutting down and wake every waiter. Already-queued items remain
    /// available to `take` until exhausted.
    pub fn shutdown(&self) {
        let mut guard = self.inner.lock();
        guard.shutting_down = true;
        drop(guard);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }
}
