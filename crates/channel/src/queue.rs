// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Unbounded queue with a non-blocking `push` and an async `pop`.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

/// An unbounded queue shared between producer and consumer daemons.
///
/// `push` never blocks; `pop` suspends the calling task until an item is
/// available. Handles are cheap to clone and all refer to the same queue.
/// The backing primitive is an implementation detail and is not exposed.
pub struct BlockingQueue<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> BlockingQueue<T> {
    /// Creates a new, empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                items: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Appends an item and wakes one waiting consumer.
    pub fn push(&self, item: T) {
        self.shared.items.lock().push_back(item);
        self.shared.notify.notify_one();
    }

    /// Removes the item at the front of the queue, waiting until one is
    /// available.
    pub async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            // A permit is stored if a push raced ahead of us, so waiting
            // here cannot miss a wake-up: the next `notified()` returns
            // immediately and the loop re-checks the queue.
            self.shared.notify.notified().await;
        }
    }

    /// Removes the item at the front of the queue, if any.
    pub fn try_pop(&self) -> Option<T> {
        self.shared.items.lock().pop_front()
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.items.lock().len()
    }

    /// Whether the queue currently holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.items.lock().is_empty()
    }
}

impl<T> Clone for BlockingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
