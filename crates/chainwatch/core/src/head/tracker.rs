//! Reconciles received heads into the longest chain.

use super::{
    BackfillError, HeadBroadcastable, HeadHandler, HeadListener, HeadListenerError, HeadSaver,
    HeadTrackerError, Metrics,
};
use crate::{
    HeadTrackerConfig, Mailbox,
    client::{ChainClient, with_timeout},
};
use async_trait::async_trait;
use chainwatch_storage::HeadStorage;
use chainwatch_types::Head;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Follows the remote chain and publishes every new longest chain.
///
/// The tracker owns three loops, all driven by [`HeadTracker::run`]:
/// - the head listener, which hands received heads to [`HeadTracker::handle_new_head`];
/// - the backfiller, which fetches missing ancestors of the latest chain;
/// - the callback loop, which hands new longest chains to the broadcaster.
#[derive(Debug)]
pub struct HeadTracker<C, DB, B> {
    config: Arc<HeadTrackerConfig>,
    client: C,
    saver: HeadSaver<DB>,
    listener: HeadListener<C>,
    broadcaster: B,
    backfill_mailbox: Mailbox<Head>,
    callback_mailbox: Mailbox<Head>,
    cancel: CancellationToken,
}

impl<C, DB, B> HeadTracker<C, DB, B>
where
    C: ChainClient + Clone,
    DB: HeadStorage,
    B: HeadBroadcastable,
{
    /// Creates a tracker. The configuration is validated first.
    pub fn new(
        config: HeadTrackerConfig,
        client: C,
        db: Arc<DB>,
        broadcaster: B,
        cancel: CancellationToken,
    ) -> Result<Self, HeadTrackerError> {
        config.validate()?;
        let config = Arc::new(config);
        Ok(Self {
            saver: HeadSaver::new(db, config.clone()),
            listener: HeadListener::new(client.clone(), config.clone()),
            backfill_mailbox: Mailbox::new(1),
            callback_mailbox: Mailbox::new(config.max_buffer_size),
            config,
            client,
            broadcaster,
            cancel,
        })
    }

    /// Enables metrics for the tracker and its listener.
    pub fn with_metrics(self) -> Self {
        Metrics::init();
        self
    }

    /// Loads the persisted chain and handles the current remote head.
    ///
    /// Subscriptions do not replay the current head, so it is fetched once here. Failing to fetch
    /// it is not fatal: the subscription delivers the next one.
    pub async fn start(&self) -> Result<(), HeadTrackerError> {
        match self.saver.load_from_db()? {
            Some(chain) => info!(
                target: "chainwatch::head_tracker",
                number = chain.number,
                hash = %chain.hash,
                chain_length = chain.chain_length(),
                "Loaded latest chain from storage"
            ),
            None => info!(target: "chainwatch::head_tracker", "No persisted heads found"),
        }

        let head =
            match with_timeout(self.config.rpc_timeout, self.client.header_by_number(None)).await {
                Ok(head) => head,
                Err(err) => {
                    warn!(target: "chainwatch::head_tracker", %err, "Failed to fetch the current head");
                    return Ok(());
                }
            };

        if head.evm_chain_id != Some(self.config.chain_id) {
            return Err(HeadListenerError::ChainIdMismatch {
                expected: self.config.chain_id,
                actual: head.evm_chain_id,
            }
            .into());
        }

        info!(target: "chainwatch::head_tracker", number = head.number, hash = %head.hash, "Fetched current head");
        self.handle_new_head(head).await
    }

    /// Runs the listener, backfill and callback loops until the cancellation token fires or the
    /// listener fails.
    pub async fn run(&self) -> Result<(), HeadTrackerError> {
        info!(target: "chainwatch::head_tracker", "Head tracker started");
        let listen = async {
            let listened = self.listener.listen_for_new_heads(self, &self.cancel).await;
            if listened.is_err() {
                self.cancel.cancel();
            }
            listened
        };

        let (listened, (), ()) = tokio::join!(listen, self.backfill_loop(), self.callback_loop());
        info!(target: "chainwatch::head_tracker", "Head tracker stopped");
        Ok(listened?)
    }

    /// Saves `head` and, if it extends past the previous latest head, publishes its chain.
    pub async fn handle_new_head(&self, head: Head) -> Result<(), HeadTrackerError> {
        metrics::counter!(Metrics::HEADS_RECEIVED_TOTAL).increment(1);
        let prev = self.saver.latest_chain();
        self.saver.save(&head)?;

        match prev {
            Some(prev) if head.number == prev.number => {
                if head.hash != prev.hash {
                    debug!(
                        target: "chainwatch::head_tracker",
                        number = head.number,
                        hash = %head.hash,
                        prev_hash = %prev.hash,
                        "Received competing head at the current height"
                    );
                } else {
                    trace!(target: "chainwatch::head_tracker", number = head.number, "Received current head again");
                }
                Ok(())
            }
            Some(prev) if head.number < prev.number => {
                let gap = prev.number - head.number;
                if gap > self.config.finality_depth {
                    metrics::counter!(Metrics::VERY_OLD_HEAD_TOTAL).increment(1);
                    error!(
                        target: "chainwatch::head_tracker",
                        number = head.number,
                        latest = prev.number,
                        finality_depth = self.config.finality_depth,
                        "Received head far below the latest head, the remote node may have reorganised past finality"
                    );
                } else {
                    debug!(
                        target: "chainwatch::head_tracker",
                        number = head.number,
                        latest = prev.number,
                        "Received out of order head"
                    );
                }
                Ok(())
            }
            _ => self.publish_longest_chain(&head),
        }
    }

    fn publish_longest_chain(&self, head: &Head) -> Result<(), HeadTrackerError> {
        let Some(chain) = self.saver.chain(head.hash) else {
            metrics::counter!(Metrics::CHAIN_NOT_RECONSTRUCTABLE_TOTAL).increment(1);
            error!(
                target: "chainwatch::head_tracker",
                number = head.number,
                hash = %head.hash,
                "Saved head cannot be found in memory"
            );
            return Err(HeadTrackerError::ChainNotReconstructable {
                number: head.number,
                hash: head.hash,
            });
        };

        metrics::gauge!(Metrics::CURRENT_HEAD).set(chain.number as f64);
        debug!(
            target: "chainwatch::head_tracker",
            number = chain.number,
            hash = %chain.hash,
            chain_length = chain.chain_length(),
            "New longest chain"
        );

        self.backfill_mailbox.deliver(chain.clone());
        if self.callback_mailbox.deliver(chain) {
            debug!(target: "chainwatch::head_tracker", "Callback mailbox full, dropped oldest head");
        }
        Ok(())
    }

    /// Fetches the missing ancestors of `head` until its chain is `depth` heads long or reaches
    /// genesis.
    pub async fn backfill(&self, head: &Head, depth: u64) -> Result<(), BackfillError> {
        if head.chain_length() >= depth {
            return Ok(());
        }

        let base = head.number.saturating_sub(depth - 1);
        let mut child = head.earliest_in_chain().detached();
        let mut fetched = 0usize;

        while child.number > base {
            let number = child.number - 1;
            let parent = match self.saver.head(child.parent_hash) {
                Some(parent) => parent,
                None => {
                    let parent = with_timeout(
                        self.config.rpc_timeout,
                        self.client.header_by_number(Some(number)),
                    )
                    .await?;
                    if parent.hash != child.parent_hash {
                        return Err(BackfillError::HashMismatch {
                            number,
                            expected: child.parent_hash,
                            actual: parent.hash,
                        });
                    }
                    self.saver.save(&parent)?;
                    fetched += 1;
                    parent
                }
            };
            child = parent;
        }

        if fetched > 0 {
            debug!(
                target: "chainwatch::head_tracker",
                number = head.number,
                base,
                fetched,
                "Backfilled missing heads"
            );
        }
        Ok(())
    }

    async fn backfill_loop(&self) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = self.backfill_mailbox.notified() => {}
            }
            let Some(head) = self.backfill_mailbox.retrieve() else { continue };

            let timeout = self.config.backfill_timeout;
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                backfilled = tokio::time::timeout(timeout, self.backfill(&head, self.config.finality_depth)) => {
                    match backfilled {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            warn!(target: "chainwatch::head_tracker", %err, number = head.number, "Backfill failed");
                        }
                        Err(_) => {
                            warn!(target: "chainwatch::head_tracker", ?timeout, number = head.number, "Backfill timed out");
                        }
                    }
                }
            }
        }
    }

    async fn callback_loop(&self) {
        let Some(interval) = self.config.sampling_interval else {
            loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return,
                    _ = self.callback_mailbox.notified() => {
                        for head in self.callback_mailbox.retrieve_all() {
                            self.broadcaster.broadcast_new_longest_chain(head);
                        }
                    }
                }
            }
        };

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if let Some(head) = self.callback_mailbox.retrieve_latest_and_clear() {
                        self.broadcaster.broadcast_new_longest_chain(head);
                    }
                }
            }
        }
    }

    /// Fails while heads are not arriving or the head subscription is down.
    pub fn healthy(&self) -> Result<(), HeadTrackerError> {
        if !self.listener.receiving_heads() {
            return Err(HeadTrackerError::NotReceivingHeads);
        }
        if !self.listener.connected() {
            return Err(HeadTrackerError::NotConnected);
        }
        Ok(())
    }

    /// The chain ending at the highest known head.
    pub fn latest_chain(&self) -> Option<Head> {
        self.saver.latest_chain()
    }
}

#[async_trait]
impl<C, DB, B> HeadHandler for HeadTracker<C, DB, B>
where
    C: ChainClient + Clone,
    DB: HeadStorage,
    B: HeadBroadcastable,
{
    async fn handle_new_head(&self, head: Head) {
        let (number, hash) = (head.number, head.hash);
        if let Err(err) = Self::handle_new_head(self, head).await {
            error!(target: "chainwatch::head_tracker", %err, number, %hash, "Failed to handle new head");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ClientError,
        test_utils::{CHAIN_ID, MockClient, chain, fork_head, head, open_subscription, temp_db},
    };
    use chainwatch_storage::{ChainDb, HeadStorageWriter};
    use mockall::mock;
    use rstest::rstest;
    use std::{sync::Mutex, time::Duration};
    use tempfile::TempDir;

    mock!(
        #[derive(Debug)]
        pub Broadcaster {}

        impl HeadBroadcastable for Broadcaster {
            fn broadcast_new_longest_chain(&self, head: Head);
        }
    );

    #[derive(Debug, Default)]
    struct Recorder {
        heads: Mutex<Vec<Head>>,
    }

    impl Recorder {
        fn numbers(&self) -> Vec<u64> {
            self.heads.lock().unwrap().iter().map(|h| h.number).collect()
        }
    }

    impl HeadBroadcastable for Recorder {
        fn broadcast_new_longest_chain(&self, head: Head) {
            self.heads.lock().unwrap().push(head);
        }
    }

    type TestTracker<B> = HeadTracker<Arc<MockClient>, ChainDb, B>;

    fn config() -> HeadTrackerConfig {
        HeadTrackerConfig {
            chain_id: CHAIN_ID,
            history_depth: 10,
            finality_depth: 5,
            max_buffer_size: 3,
            ..Default::default()
        }
    }

    fn tracker<B: HeadBroadcastable>(
        config: HeadTrackerConfig,
        client: MockClient,
        broadcaster: B,
    ) -> (TempDir, Arc<ChainDb>, TestTracker<B>) {
        let (dir, db) = temp_db();
        let tracker =
            HeadTracker::new(config, Arc::new(client), db.clone(), broadcaster, CancellationToken::new())
                .expect("valid config");
        (dir, db, tracker)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let (_dir, db) = temp_db();
        let config = HeadTrackerConfig { history_depth: 2, finality_depth: 5, ..config() };
        let created = HeadTracker::new(
            config,
            Arc::new(MockClient::new()),
            db,
            Arc::new(Recorder::default()),
            CancellationToken::new(),
        );
        assert!(matches!(created, Err(HeadTrackerError::Config(_))));
    }

    #[tokio::test]
    async fn test_start_loads_chain_and_handles_current_head() {
        let mut client = MockClient::new();
        client.expect_header_by_number().withf(|n| n.is_none()).times(1).returning(|_| Ok(head(3)));
        let mut broadcaster = MockBroadcaster::new();
        broadcaster.expect_broadcast_new_longest_chain().never();

        let (_dir, db, tracker) = tracker(config(), client, broadcaster);
        for number in 0..3 {
            db.insert_head(&head(number)).unwrap();
        }

        tracker.start().await.unwrap();
        let latest = tracker.latest_chain().expect("latest chain");
        assert_eq!(latest.number, 3);
        assert_eq!(latest.chain_length(), 4);
        assert_eq!(tracker.callback_mailbox.len(), 1);
        assert_eq!(tracker.backfill_mailbox.len(), 1);
    }

    #[tokio::test]
    async fn test_start_tolerates_fetch_failure() {
        let mut client = MockClient::new();
        client.expect_header_by_number().returning(|_| Err(ClientError::SubscriptionClosed));

        let (_dir, _db, tracker) = tracker(config(), client, Arc::new(Recorder::default()));
        tracker.start().await.unwrap();
        assert!(tracker.latest_chain().is_none());
    }

    #[tokio::test]
    async fn test_start_rejects_other_chain() {
        let mut client = MockClient::new();
        client.expect_header_by_number().returning(|_| Ok(head(3).with_chain_id(CHAIN_ID + 1)));

        let (_dir, _db, tracker) = tracker(config(), client, Arc::new(Recorder::default()));
        let started = tracker.start().await;
        assert!(matches!(
            started,
            Err(HeadTrackerError::Listener(HeadListenerError::ChainIdMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_only_higher_heads_are_published() {
        let (_dir, _db, tracker) =
            tracker(config(), MockClient::new(), Arc::new(Recorder::default()));

        tracker.handle_new_head(head(8)).await.unwrap();
        tracker.handle_new_head(fork_head(8, 1, 0)).await.unwrap();
        tracker.handle_new_head(head(7)).await.unwrap();
        tracker.handle_new_head(head(1)).await.unwrap();
        assert_eq!(tracker.callback_mailbox.len(), 1);

        tracker.handle_new_head(head(9)).await.unwrap();
        let published = tracker.callback_mailbox.retrieve_all();
        assert_eq!(published.iter().map(|h| h.number).collect::<Vec<_>>(), vec![8, 9]);
        assert_eq!(published[1].chain_length(), 3);
    }

    #[tokio::test]
    async fn test_backfill_fetches_missing_ancestors() {
        let mut client = MockClient::new();
        client.expect_header_by_number().returning(|n| Ok(head(n.expect("explicit number"))));

        let (_dir, _db, tracker) =
            tracker(config(), client, Arc::new(Recorder::default()));
        tracker.handle_new_head(head(10)).await.unwrap();

        let latest = tracker.latest_chain().unwrap();
        tracker.backfill(&latest, 4).await.unwrap();
        let latest = tracker.latest_chain().unwrap();
        assert_eq!(latest.chain_length(), 4);
        assert_eq!(latest.earliest_in_chain().number, 7);
    }

    #[tokio::test]
    async fn test_backfill_stops_at_genesis() {
        let mut client = MockClient::new();
        client.expect_header_by_number().returning(|n| Ok(head(n.expect("explicit number"))));

        let (_dir, _db, tracker) =
            tracker(config(), client, Arc::new(Recorder::default()));
        tracker.handle_new_head(head(2)).await.unwrap();
        tracker.backfill(&tracker.latest_chain().unwrap(), 5).await.unwrap();

        let latest = tracker.latest_chain().unwrap();
        assert_eq!(latest.chain_length(), 3);
        assert_eq!(latest.earliest_in_chain().number, 0);
    }

    #[tokio::test]
    async fn test_backfill_uses_cached_heads() {
        let mut client = MockClient::new();
        client.expect_header_by_number().withf(|n| *n == Some(8)).times(1).returning(|_| Ok(head(8)));

        let (_dir, _db, tracker) =
            tracker(config(), client, Arc::new(Recorder::default()));
        tracker.handle_new_head(head(9)).await.unwrap();
        tracker.handle_new_head(head(10)).await.unwrap();

        tracker.backfill(&chain(10, 10), 3).await.unwrap();
        assert_eq!(tracker.latest_chain().unwrap().chain_length(), 3);
    }

    #[tokio::test]
    async fn test_backfill_noop_when_chain_is_long_enough() {
        let (_dir, _db, tracker) =
            tracker(config(), MockClient::new(), Arc::new(Recorder::default()));
        tracker.backfill(&chain(3, 6), 4).await.unwrap();
    }

    #[tokio::test]
    async fn test_backfill_detects_reorg() {
        let mut client = MockClient::new();
        client.expect_header_by_number().returning(|_| Ok(fork_head(9, 1, 0)));

        let (_dir, _db, tracker) =
            tracker(config(), client, Arc::new(Recorder::default()));
        tracker.handle_new_head(head(10)).await.unwrap();

        let backfilled = tracker.backfill(&tracker.latest_chain().unwrap(), 3).await;
        assert!(matches!(backfilled, Err(BackfillError::HashMismatch { number: 9, .. })));
    }

    #[rstest]
    #[case::every_head(None, vec![3, 4, 5])]
    #[case::sampled(Some(Duration::from_secs(1)), vec![5])]
    #[tokio::test(start_paused = true)]
    async fn test_callback_delivery_modes(
        #[case] sampling_interval: Option<Duration>,
        #[case] expected: Vec<u64>,
    ) {
        let recorder = Arc::new(Recorder::default());
        let config = HeadTrackerConfig { sampling_interval, ..config() };
        let (_dir, _db, tracker) = tracker(config, MockClient::new(), recorder.clone());

        for number in 1..=5 {
            tracker.handle_new_head(head(number)).await.unwrap();
        }

        let _ = tokio::time::timeout(Duration::from_millis(1500), tracker.callback_loop()).await;
        assert_eq!(recorder.numbers(), expected);
    }

    #[tokio::test]
    async fn test_not_healthy_before_running() {
        let (_dir, _db, tracker) =
            tracker(config(), MockClient::new(), Arc::new(Recorder::default()));
        assert!(matches!(tracker.healthy(), Err(HeadTrackerError::NotReceivingHeads)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_longer_fork_replaces_canonical_chain() {
        let mut client = MockClient::new();
        client.expect_header_by_number().withf(|n| n.is_none()).returning(|_| Ok(head(1)));
        client.expect_header_by_number().withf(|n| *n == Some(0)).returning(|_| Ok(head(0)));
        client.expect_subscribe_new_heads().times(1).returning(|| {
            Ok(open_subscription(vec![
                head(2),
                fork_head(2, 1, 0),
                fork_head(3, 1, 1),
                fork_head(4, 1, 1),
            ]))
        });

        let recorder = Arc::new(Recorder::default());
        let config = HeadTrackerConfig { max_buffer_size: 10, ..config() };
        let (_dir, _db, tracker) = tracker(config, client, recorder.clone());
        let tracker = Arc::new(tracker);
        tracker.start().await.unwrap();

        let handle = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.run().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(tracker.healthy().is_ok());

        tracker.cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(recorder.numbers(), vec![1, 2, 3, 4]);
        let heads = recorder.heads.lock().unwrap();
        let longest = heads.last().unwrap();
        assert_eq!(longest.hash, fork_head(4, 1, 1).hash);
        assert_eq!(longest.hash_at_height(3), Some(fork_head(3, 1, 1).hash));
        assert_eq!(longest.hash_at_height(2), Some(fork_head(2, 1, 0).hash));
        assert!(longest.is_in_chain(head(1).hash));
        assert!(!longest.is_in_chain(head(2).hash));
    }
}
