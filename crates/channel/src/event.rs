// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! One-shot event latch used as a startup barrier between daemons.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

/// A latch supporting `set`, `clear`, and `wait`.
///
/// Multiple tasks may wait; `set` wakes all of them. A `clear` after a `set`
/// does not retroactively unwake tasks that already observed the latch.
#[derive(Clone, Default)]
pub struct Event {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    is_set: Mutex<bool>,
    notify: Notify,
}

impl Event {
    /// Creates a new latch in the cleared state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the latch and wakes every waiting task.
    pub fn set(&self) {
        *self.shared.is_set.lock() = true;
        self.shared.notify.notify_waiters();
    }

    /// Clears the latch so that subsequent `wait` calls block again.
    pub fn clear(&self) {
        *self.shared.is_set.lock() = false;
    }

    /// Whether the latch is currently set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.shared.is_set.lock()
    }

    /// Waits until the latch is set. Returns immediately if it already is.
    pub async fn wait(&self) {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register interest before re-checking the flag so that a `set`
            // racing with this call cannot be missed.
            let _ = notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn wait_returns_immediately_when_already_set() {
        let event = Event::new();
        event.set();
        timeout(Duration::from_millis(50), event.wait())
            .await
            .expect("wait should not block on a set latch");
    }

    #[tokio::test]
    async fn set_wakes_all_waiters() {
        let event = Event::new();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let waiter = event.clone();
            handles.push(tokio::spawn(async move { waiter.wait().await }));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        event.set();

        for handle in handles {
            timeout(Duration::from_secs(1), handle)
                .await
                .expect("waiter did not wake")
                .expect("waiter task failed");
        }
    }

    #[tokio::test]
    async fn clear_blocks_later_waiters() {
        let event = Event::new();
        event.set();
        event.clear();
        assert!(!event.is_set());
        let blocked = timeout(Duration::from_millis(50), event.wait()).await;
        assert!(blocked.is_err(), "wait should block after clear");
    }
}
