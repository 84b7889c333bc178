//! Fan-out of new longest chains to subscribers.

use crate::Mailbox;
use async_trait::async_trait;
use auto_impl::auto_impl;
use chainwatch_types::Head;
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default bound on a single subscriber callback.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Something interested in the longest chain.
#[async_trait]
#[auto_impl(&, Arc)]
pub trait HeadTrackable: Send + Sync + fmt::Debug {
    /// Called with every new longest chain. Slow implementations are abandoned after the
    /// broadcaster's callback timeout.
    async fn on_new_longest_chain(&self, head: Head);
}

/// Accepts new longest chains from the tracker.
#[auto_impl(&, Arc)]
pub trait HeadBroadcastable: Send + Sync + fmt::Debug {
    /// Queues `head` for delivery to subscribers without waiting for them.
    fn broadcast_new_longest_chain(&self, head: Head);
}

#[derive(Debug)]
struct Inner {
    callbacks: Mutex<HashMap<u64, Arc<dyn HeadTrackable>>>,
    next_id: Mutex<u64>,
    latest: Mutex<Option<Head>>,
    mailbox: Mailbox<Head>,
    callback_timeout: Duration,
}

impl Inner {
    fn callbacks(&self) -> MutexGuard<'_, HashMap<u64, Arc<dyn HeadTrackable>>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn latest(&self) -> MutexGuard<'_, Option<Head>> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unsubscribe(&self, id: u64) {
        if self.callbacks().remove(&id).is_some() {
            debug!(target: "chainwatch::head_broadcaster", id, "Unsubscribed");
        }
    }
}

/// Delivers each new longest chain to every subscriber.
///
/// Broadcasting never blocks: heads land in a mailbox holding only the most recent one, and a
/// subscriber that is still busy when another head arrives only sees the newer one.
#[derive(Debug, Clone)]
pub struct HeadBroadcaster {
    inner: Arc<Inner>,
}

impl Default for HeadBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadBroadcaster {
    /// Creates a broadcaster with no subscribers.
    pub fn new() -> Self {
        Self::with_callback_timeout(DEFAULT_CALLBACK_TIMEOUT)
    }

    /// Creates a broadcaster that abandons callbacks running longer than `callback_timeout`.
    pub fn with_callback_timeout(callback_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                callbacks: Mutex::new(HashMap::new()),
                next_id: Mutex::new(0),
                latest: Mutex::new(None),
                mailbox: Mailbox::new(1),
                callback_timeout,
            }),
        }
    }

    /// Registers `callback`.
    ///
    /// Returns the latest broadcast head, if any, together with a handle that removes the
    /// subscription.
    pub fn subscribe(&self, callback: Arc<dyn HeadTrackable>) -> (Option<Head>, Unsubscriber) {
        let id = {
            let mut next_id = self.inner.next_id.lock().unwrap_or_else(PoisonError::into_inner);
            let id = *next_id;
            *next_id += 1;
            id
        };
        self.inner.callbacks().insert(id, callback);
        debug!(target: "chainwatch::head_broadcaster", id, "Subscribed");

        (self.latest_head(), Unsubscriber { id, inner: Arc::downgrade(&self.inner) })
    }

    /// The last head handed to subscribers.
    pub fn latest_head(&self) -> Option<Head> {
        self.inner.latest().clone()
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.callbacks().len()
    }

    /// Delivers queued heads until `cancel` fires, then drops every subscription.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(target: "chainwatch::head_broadcaster", "Head broadcaster started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.inner.mailbox.notified() => {
                    if let Some(head) = self.inner.mailbox.retrieve_latest_and_clear() {
                        self.execute_callbacks(head).await;
                    }
                }
            }
        }

        self.inner.callbacks().clear();
        info!(target: "chainwatch::head_broadcaster", "Head broadcaster stopped");
    }

    async fn execute_callbacks(&self, head: Head) {
        *self.inner.latest() = Some(head.clone());

        let callbacks: Vec<_> =
            self.inner.callbacks().iter().map(|(id, cb)| (*id, cb.clone())).collect();
        debug!(
            target: "chainwatch::head_broadcaster",
            number = head.number,
            subscribers = callbacks.len(),
            "Broadcasting new longest chain"
        );

        let timeout = self.inner.callback_timeout;
        let mut calls = JoinSet::new();
        for (id, callback) in callbacks {
            let head = head.clone();
            calls.spawn(async move {
                if tokio::time::timeout(timeout, callback.on_new_longest_chain(head)).await.is_err()
                {
                    warn!(
                        target: "chainwatch::head_broadcaster",
                        id,
                        ?timeout,
                        "Subscriber did not handle the new longest chain in time"
                    );
                }
            });
        }

        while let Some(joined) = calls.join_next().await {
            if let Err(err) = joined {
                warn!(target: "chainwatch::head_broadcaster", %err, "Subscriber callback panicked");
            }
        }
    }
}

impl HeadBroadcastable for HeadBroadcaster {
    fn broadcast_new_longest_chain(&self, head: Head) {
        self.inner.mailbox.deliver(head);
    }
}

/// Removes a subscription when [`Unsubscriber::unsubscribe`] is called.
///
/// Dropping the handle keeps the subscription alive.
#[derive(Clone)]
pub struct Unsubscriber {
    id: u64,
    inner: Weak<Inner>,
}

impl Unsubscriber {
    /// Removes the subscription. Calling this more than once is harmless.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.unsubscribe(self.id);
        }
    }
}

impl fmt::Debug for Unsubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscriber").field("id", &self.id).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::head;
    use mockall::mock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    mock!(
        #[derive(Debug)]
        pub Trackable {}

        #[async_trait]
        impl HeadTrackable for Trackable {
            async fn on_new_longest_chain(&self, head: Head);
        }
    );

    #[derive(Debug, Default)]
    struct Recorder {
        heads: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl HeadTrackable for Recorder {
        async fn on_new_longest_chain(&self, head: Head) {
            self.heads.lock().unwrap().push(head.number);
        }
    }

    #[derive(Debug, Default)]
    struct Stuck {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HeadTrackable for Stuck {
        async fn on_new_longest_chain(&self, _head: Head) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            futures::future::pending::<()>().await;
        }
    }

    fn spawn(broadcaster: &HeadBroadcaster) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let cancel = CancellationToken::new();
        let handle = {
            let broadcaster = broadcaster.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { broadcaster.run(cancel).await })
        };
        (cancel, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivers_to_every_subscriber() {
        let broadcaster = HeadBroadcaster::new();
        let mut first = MockTrackable::new();
        first.expect_on_new_longest_chain().withf(|head| head.number == 7).times(1).return_const(());
        let second = Arc::new(Recorder::default());

        let (latest, _first) = broadcaster.subscribe(Arc::new(first));
        assert!(latest.is_none());
        broadcaster.subscribe(second.clone());

        let (cancel, handle) = spawn(&broadcaster);
        broadcaster.broadcast_new_longest_chain(head(7));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(*second.heads.lock().unwrap(), vec![7]);
        assert_eq!(broadcaster.latest_head().map(|h| h.number), Some(7));

        let (latest, _) = broadcaster.subscribe(Arc::new(Recorder::default()));
        assert_eq!(latest.map(|h| h.number), Some(7));

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_latest_head_is_delivered() {
        let broadcaster = HeadBroadcaster::new();
        let recorder = Arc::new(Recorder::default());
        broadcaster.subscribe(recorder.clone());

        broadcaster.broadcast_new_longest_chain(head(1));
        broadcaster.broadcast_new_longest_chain(head(2));
        broadcaster.broadcast_new_longest_chain(head(3));

        let (cancel, handle) = spawn(&broadcaster);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*recorder.heads.lock().unwrap(), vec![3]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_is_idempotent() {
        let broadcaster = HeadBroadcaster::new();
        let recorder = Arc::new(Recorder::default());
        let (_, unsubscriber) = broadcaster.subscribe(recorder.clone());
        assert_eq!(broadcaster.subscriber_count(), 1);

        unsubscriber.unsubscribe();
        unsubscriber.unsubscribe();
        assert_eq!(broadcaster.subscriber_count(), 0);

        let (cancel, handle) = spawn(&broadcaster);
        broadcaster.broadcast_new_longest_chain(head(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(recorder.heads.lock().unwrap().is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_subscriber_does_not_block_others() {
        let broadcaster = HeadBroadcaster::with_callback_timeout(Duration::from_secs(1));
        let stuck = Arc::new(Stuck::default());
        let recorder = Arc::new(Recorder::default());
        broadcaster.subscribe(stuck.clone());
        broadcaster.subscribe(recorder.clone());

        let (cancel, handle) = spawn(&broadcaster);
        broadcaster.broadcast_new_longest_chain(head(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        broadcaster.broadcast_new_longest_chain(head(2));
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(stuck.calls.load(Ordering::SeqCst), 2);
        assert_eq!(*recorder.heads.lock().unwrap(), vec![1, 2]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_unsubscriber_outliving_broadcaster() {
        let broadcaster = HeadBroadcaster::new();
        let (_, unsubscriber) = broadcaster.subscribe(Arc::new(Recorder::default()));
        drop(broadcaster);
        unsubscriber.unsubscribe();
    }
}
