//! Bounded queue used to hand items from one task to another.
//!
//! A [`Mailbox`] never blocks the producer: once full, delivering drops the oldest item. The
//! consumer waits on [`Mailbox::notified`] and then drains the box, either fully in order or by
//! taking only the latest item.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tokio::sync::Notify;

/// A bounded, drop-oldest queue with wake-up notification.
#[derive(Debug)]
pub struct Mailbox<T> {
    capacity: usize,
    queue: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> Mailbox<T> {
    /// Creates a mailbox holding at most `capacity` items. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, queue: Mutex::new(VecDeque::with_capacity(capacity)), notify: Notify::new() }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `item` and wakes the consumer.
    ///
    /// Returns `true` if the mailbox was full and the oldest item was dropped.
    pub fn deliver(&self, item: T) -> bool {
        let dropped = {
            let mut queue = self.queue();
            let dropped = if queue.len() >= self.capacity { queue.pop_front().is_some() } else { false };
            queue.push_back(item);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    /// Takes the oldest item.
    pub fn retrieve(&self) -> Option<T> {
        self.queue().pop_front()
    }

    /// Takes the newest item and discards the rest.
    pub fn retrieve_latest_and_clear(&self) -> Option<T> {
        let mut queue = self.queue();
        let latest = queue.pop_back();
        queue.clear();
        latest
    }

    /// Takes every queued item, oldest first.
    pub fn retrieve_all(&self) -> Vec<T> {
        self.queue().drain(..).collect()
    }

    /// Completes once an item has been delivered since the last wake-up.
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.queue().len()
    }

    /// Whether the mailbox is empty.
    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    /// Maximum number of queued items.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
