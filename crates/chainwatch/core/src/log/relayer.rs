//! Delivers stored logs to registered listeners once they are confirmed.
//!
//! Registrations are owned by the relayer task and changed only through [`RelayerCommand`]s, so
//! the delivery state of a listener is never touched concurrently.

use super::{Broadcast, ListenerOpts, LogListener, Metrics, SubscriberEvent};
use crate::{LogBroadcasterConfig, Mailbox};
use alloy_primitives::{Address, map::HashMap};
use chainwatch_storage::{LogKey, LogStorage, StorageError};
use chainwatch_types::{Head, JobId, LogRecord};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

/// Changes to the set of registrations.
#[derive(Debug)]
pub(crate) enum RelayerCommand {
    Register { listener: Arc<dyn LogListener>, opts: ListenerOpts },
    Unregister { address: Address, job_id: JobId },
}

/// Delivery state of one listener for one contract.
#[derive(Debug)]
struct Registration {
    listener: Arc<dyn LogListener>,
    opts: ListenerOpts,
    /// Lowest block whose logs are not known to be delivered on the current chain.
    lowest_allowed: u64,
    /// Chain the delivery state was last reconciled against.
    last_seen_chain: Option<Head>,
}

impl Registration {
    fn new(listener: Arc<dyn LogListener>, opts: ListenerOpts) -> Self {
        Self { listener, opts, lowest_allowed: 0, last_seen_chain: None }
    }

    /// Whether `log` has enough confirmations on `head` and was not delivered on this chain yet.
    fn is_eligible(&self, head: &Head, log: &LogRecord) -> bool {
        if !self.opts.matches(log) {
            return false;
        }
        if head.number + 1 < log.block_number + self.opts.confirmations() {
            return false;
        }
        log.block_number >= self.lowest_allowed ||
            !self.last_seen_chain.as_ref().is_some_and(|seen| seen.is_in_chain(log.block_hash))
    }

    /// Selects the logs to deliver for `head` and advances the delivery state.
    ///
    /// Progress is only kept if `head` extends the chain seen last time. After a reorg everything
    /// still pending is offered again.
    fn take_batch(&mut self, head: &Head, logs: &[LogRecord]) -> Vec<LogRecord> {
        let batch: Vec<_> = logs.iter().filter(|log| self.is_eligible(head, log)).cloned().collect();

        let consistent =
            self.last_seen_chain.as_ref().is_none_or(|seen| head.is_in_chain(seen.hash));
        if !consistent {
            debug!(
                target: "chainwatch::log_relayer",
                job_id = self.listener.job_id(),
                number = head.number,
                "Chain reorganised since last delivery, resetting progress"
            );
            self.lowest_allowed = 0;
        } else if let Some(max_delivered) = batch.iter().map(|log| log.block_number).max() {
            self.lowest_allowed = self.lowest_allowed.max(max_delivered + 1);
        }
        self.last_seen_chain = Some(head.clone());
        batch
    }
}

/// Listeners registered per `(contract, job)`.
#[derive(Debug, Default)]
pub(crate) struct Registrations {
    entries: HashMap<(Address, JobId), Registration>,
}

impl Registrations {
    /// Adds a registration. Returns `false` if the key is already registered.
    fn add(&mut self, listener: Arc<dyn LogListener>, opts: ListenerOpts) -> bool {
        let key = (opts.contract, listener.job_id());
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, Registration::new(listener, opts));
        true
    }

    fn remove(&mut self, address: Address, job_id: JobId) -> bool {
        self.entries.remove(&(address, job_id)).is_some()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Smallest confirmation count requested by any listener.
    fn fewest_confirmations(&self) -> Option<u64> {
        self.entries.values().map(|reg| reg.opts.confirmations()).min()
    }

    /// Largest confirmation count requested by any listener.
    fn highest_confirmations(&self) -> u64 {
        self.entries.values().map(|reg| reg.opts.confirmations()).max().unwrap_or(0)
    }

    fn matching(&self, log: &LogRecord) -> impl Iterator<Item = &Registration> {
        self.entries.values().filter(move |reg| reg.opts.matches(log))
    }

    fn listeners(&self) -> impl Iterator<Item = &Arc<dyn LogListener>> {
        self.entries.values().map(|reg| &reg.listener)
    }
}

/// Stores incoming logs and hands confirmed ones to their listeners on every new head.
#[derive(Debug)]
pub(crate) struct LogRelayer {
    db: Arc<dyn LogStorage>,
    config: Arc<LogBroadcasterConfig>,
    registrations: Registrations,
}

impl LogRelayer {
    pub(crate) fn new(db: Arc<dyn LogStorage>, config: Arc<LogBroadcasterConfig>) -> Self {
        Self { db, config, registrations: Registrations::default() }
    }

    /// Processes commands, subscriber events and heads until `cancel` fires.
    ///
    /// Commands take precedence over logs, and logs over heads, so a log is stored before the
    /// head confirming it is processed.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<RelayerCommand>,
        mut events: mpsc::Receiver<SubscriberEvent>,
        heads: &Mailbox<Head>,
        cancel: &CancellationToken,
    ) {
        info!(target: "chainwatch::log_relayer", "Log relayer started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(command) = commands.recv() => self.apply(command),
                Some(event) = events.recv() => self.on_event(event),
                _ = heads.notified() => {
                    if let Some(head) = heads.retrieve_latest_and_clear() {
                        self.on_new_head(&head).await;
                    }
                }
            }
        }
        info!(target: "chainwatch::log_relayer", "Log relayer stopped");
    }

    fn apply(&mut self, command: RelayerCommand) {
        match command {
            RelayerCommand::Register { listener, opts } => {
                let (job_id, contract) = (listener.job_id(), opts.contract);
                if self.registrations.add(listener, opts) {
                    debug!(target: "chainwatch::log_relayer", job_id, %contract, "Registered listener");
                } else {
                    error!(target: "chainwatch::log_relayer", job_id, %contract, "Listener already registered");
                }
            }
            RelayerCommand::Unregister { address, job_id } => {
                if self.registrations.remove(address, job_id) {
                    debug!(target: "chainwatch::log_relayer", job_id, %address, "Unregistered listener");
                }
            }
        }
        metrics::gauge!(Metrics::REGISTRATIONS).set(self.registrations.len() as f64);
    }

    fn on_event(&mut self, event: SubscriberEvent) {
        match event {
            SubscriberEvent::Connected => {
                self.registrations.listeners().for_each(|listener| listener.on_connect());
            }
            SubscriberEvent::Disconnected => {
                self.registrations.listeners().for_each(|listener| listener.on_disconnect());
            }
            SubscriberEvent::Log(log) => {
                if let Err(err) = self.on_new_log(&log) {
                    error!(target: "chainwatch::log_relayer", %err, %log, "Failed to store log");
                }
            }
            SubscriberEvent::Removed(log) => {
                metrics::counter!(Metrics::LOGS_REMOVED_TOTAL).increment(1);
                debug!(target: "chainwatch::log_relayer", %log, "Deleting log removed by reorg");
                if let Err(err) = self.db.delete_log_and_broadcasts(LogKey::from(&log)) {
                    error!(target: "chainwatch::log_relayer", %err, %log, "Failed to delete removed log");
                }
            }
        }
    }

    /// Stores `log` as pending for every listener it matches.
    fn on_new_log(&self, log: &LogRecord) -> Result<(), StorageError> {
        let mut matching = self.registrations.matching(log).peekable();
        if matching.peek().is_none() {
            trace!(target: "chainwatch::log_relayer", %log, "No listener for log");
            return Ok(());
        }

        self.db.upsert_log(log)?;
        let key = LogKey::from(log);
        for reg in matching {
            self.db.upsert_unconsumed_broadcast_for_listener(key, reg.listener.job_id())?;
        }
        Ok(())
    }

    async fn on_new_head(&mut self, head: &Head) {
        if let Err(err) = self.deliver_confirmed(head).await {
            error!(target: "chainwatch::log_relayer", %err, number = head.number, "Failed to deliver logs");
        }
        if let Err(err) = self.prune(head) {
            error!(target: "chainwatch::log_relayer", %err, number = head.number, "Failed to prune logs");
        }
    }

    async fn deliver_confirmed(&mut self, head: &Head) -> Result<(), StorageError> {
        let Some(fewest) = self.registrations.fewest_confirmations() else { return Ok(()) };

        let height = (head.number + 2).saturating_sub(fewest);
        let mut logs = Vec::new();
        for log in self.db.unconsumed_logs_prior_to_block(height)? {
            if head.covers_height(log.block_number) && !head.is_in_chain(log.block_hash) {
                // Heads can lag behind logs, so a fork is only given up once it is final.
                if log.block_number + self.config.finality_depth <= head.number {
                    metrics::counter!(Metrics::LOGS_ORPHANED_TOTAL).increment(1);
                    debug!(target: "chainwatch::log_relayer", %log, "Deleting log of a block off the final chain");
                    self.db.delete_log_and_broadcasts(LogKey::from(&log))?;
                }
                continue;
            }
            logs.push(log);
        }
        if logs.is_empty() {
            return Ok(());
        }

        let deliveries = self.registrations.entries.values_mut().filter_map(|reg| {
            let batch = reg.take_batch(head, &logs);
            (!batch.is_empty()).then(|| deliver(self.db.clone(), reg.listener.clone(), batch))
        });
        let delivered: usize = join_all(deliveries.collect::<Vec<_>>()).await.into_iter().sum();

        if delivered > 0 {
            debug!(target: "chainwatch::log_relayer", number = head.number, delivered, "Delivered logs");
        }
        Ok(())
    }

    fn prune(&self, head: &Head) -> Result<(), StorageError> {
        let depth = self.config.finality_depth + self.registrations.highest_confirmations();
        let Some(before) = head.number.checked_sub(depth) else { return Ok(()) };
        let pruned = self.db.prune_logs_before(before)?;
        if pruned > 0 {
            metrics::counter!(Metrics::LOGS_PRUNED_TOTAL).increment(pruned as u64);
            debug!(target: "chainwatch::log_relayer", before, pruned, "Pruned finalized logs");
        }
        Ok(())
    }
}

/// Hands `batch` to `listener` in order. Returns the number of delivered logs.
async fn deliver(
    db: Arc<dyn LogStorage>,
    listener: Arc<dyn LogListener>,
    batch: Vec<LogRecord>,
) -> usize {
    let job_id = listener.job_id();
    let mut delivered = 0;
    for log in batch {
        if let Err(err) = db.upsert_unconsumed_broadcast_for_listener(LogKey::from(&log), job_id) {
            error!(target: "chainwatch::log_relayer", %err, %log, job_id, "Failed to record broadcast");
            continue;
        }
        listener.handle_log(Broadcast::new(log, job_id, db.clone())).await;
        metrics::counter!(Metrics::LOGS_DELIVERED_TOTAL).increment(1);
        delivered += 1;
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{chain, fork_head, head, log, temp_db};
    use async_trait::async_trait;
    use chainwatch_storage::{ChainDb, LogStorageReader, LogStorageWriter};
    use mockall::mock;
    use rstest::rstest;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const CONTRACT: Address = Address::repeat_byte(0xcc);

    mock!(
        #[derive(Debug)]
        pub Listener {}

        #[async_trait]
        impl LogListener for Listener {
            fn on_connect(&self);
            fn on_disconnect(&self);
            async fn handle_log(&self, broadcast: Broadcast);
            fn job_id(&self) -> JobId;
        }
    );

    /// Records delivered logs, consuming them unless `consume` is off.
    #[derive(Debug)]
    struct Recorder {
        job_id: JobId,
        consume: bool,
        delivered: Mutex<Vec<(u64, u64)>>,
    }

    impl Recorder {
        fn new(job_id: JobId) -> Arc<Self> {
            Arc::new(Self { job_id, consume: true, delivered: Mutex::new(Vec::new()) })
        }

        fn non_consuming(job_id: JobId) -> Arc<Self> {
            Arc::new(Self { job_id, consume: false, delivered: Mutex::new(Vec::new()) })
        }

        fn delivered(&self) -> Vec<(u64, u64)> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LogListener for Recorder {
        async fn handle_log(&self, broadcast: Broadcast) {
            if broadcast.was_already_consumed().unwrap() {
                return;
            }
            let log = broadcast.raw_log();
            self.delivered.lock().unwrap().push((log.block_number, log.log_index));
            if self.consume {
                broadcast.mark_consumed().unwrap();
            }
        }

        fn job_id(&self) -> JobId {
            self.job_id
        }
    }

    fn relayer() -> (TempDir, Arc<ChainDb>, LogRelayer) {
        let (dir, db) = temp_db();
        let config = LogBroadcasterConfig { finality_depth: 5, ..Default::default() };
        let relayer = LogRelayer::new(db.clone(), Arc::new(config));
        (dir, db, relayer)
    }

    fn register(relayer: &mut LogRelayer, listener: Arc<dyn LogListener>, confirmations: u64) {
        relayer.apply(RelayerCommand::Register {
            listener,
            opts: ListenerOpts::new(CONTRACT).with_min_confirmations(confirmations),
        });
    }

    #[rstest]
    #[case::same_block(1, 10, true)]
    #[case::not_yet_mined(1, 9, false)]
    #[case::exactly_confirmed(3, 12, true)]
    #[case::one_short(3, 11, false)]
    #[case::zero_means_one(0, 10, true)]
    fn test_confirmation_gating(
        #[case] confirmations: u64,
        #[case] head_number: u64,
        #[case] eligible: bool,
    ) {
        let listener = Recorder::new(1);
        let reg = Registration::new(
            listener,
            ListenerOpts::new(CONTRACT).with_min_confirmations(confirmations),
        );
        let log = log(CONTRACT, 10, 0, 0);
        assert_eq!(reg.is_eligible(&chain(5, head_number.max(5)), &log), eligible);
    }

    #[test]
    fn test_duplicate_registration_is_ignored() {
        let (_dir, _db, mut relayer) = relayer();
        register(&mut relayer, Recorder::new(1), 1);
        register(&mut relayer, Recorder::new(1), 3);
        register(&mut relayer, Recorder::new(2), 3);

        assert_eq!(relayer.registrations.len(), 2);
        assert_eq!(relayer.registrations.fewest_confirmations(), Some(1));
        assert_eq!(relayer.registrations.highest_confirmations(), 3);

        relayer.apply(RelayerCommand::Unregister { address: CONTRACT, job_id: 1 });
        assert_eq!(relayer.registrations.fewest_confirmations(), Some(3));
    }

    #[test]
    fn test_unwatched_logs_are_not_stored() {
        let (_dir, db, mut relayer) = relayer();
        register(&mut relayer, Recorder::new(1), 1);

        relayer.on_event(SubscriberEvent::Log(log(Address::repeat_byte(1), 3, 0, 0)));
        relayer.on_event(SubscriberEvent::Log(log(CONTRACT, 3, 0, 1)));

        let pending = db.unconsumed_logs_prior_to_block(100).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].log_index, 1);
    }

    #[test]
    fn test_connection_events_reach_listeners() {
        let (_dir, _db, mut relayer) = relayer();
        let mut listener = MockListener::new();
        listener.expect_job_id().return_const(1u64);
        listener.expect_on_connect().times(1).return_const(());
        listener.expect_on_disconnect().times(1).return_const(());
        register(&mut relayer, Arc::new(listener), 1);

        relayer.on_event(SubscriberEvent::Connected);
        relayer.on_event(SubscriberEvent::Disconnected);
    }

    #[tokio::test]
    async fn test_logs_wait_for_confirmations() {
        let (_dir, _db, mut relayer) = relayer();
        let listener = Recorder::new(1);
        register(&mut relayer, listener.clone(), 3);

        relayer.on_event(SubscriberEvent::Log(log(CONTRACT, 10, 0, 1)));
        relayer.on_event(SubscriberEvent::Log(log(CONTRACT, 10, 0, 0)));
        relayer.on_event(SubscriberEvent::Log(log(CONTRACT, 11, 0, 0)));

        relayer.on_new_head(&chain(8, 11)).await;
        assert!(listener.delivered().is_empty());

        relayer.on_new_head(&chain(8, 12)).await;
        assert_eq!(listener.delivered(), vec![(10, 0), (10, 1)]);

        relayer.on_new_head(&chain(8, 13)).await;
        relayer.on_new_head(&chain(8, 13)).await;
        assert_eq!(listener.delivered(), vec![(10, 0), (10, 1), (11, 0)]);
    }

    #[tokio::test]
    async fn test_each_listener_gets_its_own_gating() {
        let (_dir, db, mut relayer) = relayer();
        let fast = Recorder::new(1);
        let slow = Recorder::new(2);
        register(&mut relayer, fast.clone(), 1);
        register(&mut relayer, slow.clone(), 4);

        relayer.on_event(SubscriberEvent::Log(log(CONTRACT, 10, 0, 0)));

        relayer.on_new_head(&chain(8, 10)).await;
        assert_eq!(fast.delivered(), vec![(10, 0)]);
        assert!(slow.delivered().is_empty());
        assert_eq!(db.unconsumed_logs_prior_to_block(100).unwrap().len(), 1);

        relayer.on_new_head(&chain(8, 13)).await;
        assert_eq!(fast.delivered(), vec![(10, 0)]);
        assert_eq!(slow.delivered(), vec![(10, 0)]);
        assert!(db.unconsumed_logs_prior_to_block(100).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delivered_logs_are_not_offered_again_on_same_chain() {
        let (_dir, _db, mut relayer) = relayer();
        let listener = Recorder::non_consuming(1);
        register(&mut relayer, listener.clone(), 1);

        relayer.on_event(SubscriberEvent::Log(log(CONTRACT, 10, 0, 0)));
        relayer.on_new_head(&chain(8, 10)).await;
        relayer.on_new_head(&chain(8, 11)).await;
        relayer.on_new_head(&chain(8, 12)).await;

        assert_eq!(listener.delivered(), vec![(10, 0)]);
    }

    #[tokio::test]
    async fn test_reorg_reoffers_pending_logs() {
        let (_dir, _db, mut relayer) = relayer();
        let listener = Recorder::non_consuming(1);
        register(&mut relayer, listener.clone(), 1);

        relayer.on_event(SubscriberEvent::Log(log(CONTRACT, 9, 0, 0)));
        relayer.on_new_head(&chain(8, 10)).await;
        assert_eq!(listener.delivered(), vec![(9, 0)]);

        // A competing 10 on top of the same 9 does not contain the last seen head.
        let fork = fork_head(10, 1, 0).with_parent(chain(8, 9)).unwrap();
        relayer.on_new_head(&fork).await;
        assert_eq!(listener.delivered(), vec![(9, 0)]);

        let next = fork_head(11, 1, 1).with_parent(fork).unwrap();
        relayer.on_new_head(&next).await;
        assert_eq!(listener.delivered(), vec![(9, 0), (9, 0)]);
    }

    #[tokio::test]
    async fn test_late_log_below_delivered_height_is_withheld() {
        let (_dir, db, mut relayer) = relayer();
        let listener = Recorder::new(1);
        register(&mut relayer, listener.clone(), 1);

        relayer.on_event(SubscriberEvent::Log(log(CONTRACT, 10, 0, 0)));
        relayer.on_new_head(&chain(8, 10)).await;
        assert_eq!(listener.delivered(), vec![(10, 0)]);

        relayer.on_event(SubscriberEvent::Log(log(CONTRACT, 9, 0, 0)));
        relayer.on_new_head(&chain(8, 11)).await;
        assert_eq!(listener.delivered(), vec![(10, 0)]);
        let pending = db.unconsumed_logs_prior_to_block(100).unwrap();
        assert_eq!(pending.iter().map(|log| log.block_number).collect::<Vec<_>>(), vec![9]);
    }

    #[tokio::test]
    async fn test_off_chain_logs_are_deleted_once_final() {
        let (_dir, db, mut relayer) = relayer();
        let listener = Recorder::new(1);
        register(&mut relayer, listener.clone(), 1);

        relayer.on_event(SubscriberEvent::Log(log(CONTRACT, 9, 1, 0)));
        relayer.on_event(SubscriberEvent::Log(log(CONTRACT, 9, 0, 1)));
        relayer.on_new_head(&chain(8, 10)).await;
        assert_eq!(listener.delivered(), vec![(9, 1)]);
        assert_eq!(db.unconsumed_logs_prior_to_block(100).unwrap().len(), 1);

        relayer.on_new_head(&chain(8, 14)).await;
        assert_eq!(listener.delivered(), vec![(9, 1)]);
        assert!(db.unconsumed_logs_prior_to_block(100).unwrap().is_empty());
        assert!(!db.was_broadcast_consumed(LogKey::from(&log(CONTRACT, 9, 1, 0)), 1).unwrap());
    }

    #[tokio::test]
    async fn test_fork_log_survives_a_lagging_head() {
        let (_dir, _db, mut relayer) = relayer();
        let listener = Recorder::new(1);
        register(&mut relayer, listener.clone(), 1);

        // The log of the new fork is stored before the head of that fork is processed.
        relayer.on_event(SubscriberEvent::Log(log(CONTRACT, 10, 1, 0)));
        relayer.on_new_head(&chain(8, 10)).await;
        assert!(listener.delivered().is_empty());

        let fork = fork_head(10, 1, 0).with_parent(chain(8, 9)).unwrap();
        let next = fork_head(11, 1, 1).with_parent(fork).unwrap();
        relayer.on_new_head(&next).await;
        assert_eq!(listener.delivered(), vec![(10, 0)]);
    }

    #[test]
    fn test_removed_log_is_deleted_after_its_original() {
        let (_dir, db, mut relayer) = relayer();
        register(&mut relayer, Recorder::new(1), 1);
        let stored = log(CONTRACT, 10, 0, 0);

        relayer.on_event(SubscriberEvent::Log(stored.clone()));
        relayer.on_event(SubscriberEvent::Removed(LogRecord { removed: true, ..stored.clone() }));

        assert!(db.unconsumed_logs_prior_to_block(100).unwrap().is_empty());
        assert!(!db.was_broadcast_consumed(LogKey::from(&stored), 1).unwrap());
    }

    #[tokio::test]
    async fn test_old_logs_are_pruned() {
        let (_dir, db, mut relayer) = relayer();
        register(&mut relayer, Recorder::non_consuming(1), 2);

        db.upsert_log(&log(CONTRACT, 3, 0, 0)).unwrap();
        db.upsert_log(&log(CONTRACT, 4, 0, 0)).unwrap();
        relayer.on_new_head(&head(11)).await;

        let pending = db.unconsumed_logs_prior_to_block(100).unwrap();
        assert_eq!(pending.iter().map(|log| log.block_number).collect::<Vec<_>>(), vec![4]);
    }

    #[tokio::test]
    async fn test_run_applies_commands_before_heads() {
        let (_dir, _db, relayer) = relayer();
        let listener = Recorder::new(1);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(8);
        let heads = Arc::new(Mailbox::new(1));
        let cancel = CancellationToken::new();

        commands_tx
            .send(RelayerCommand::Register {
                listener: listener.clone(),
                opts: ListenerOpts::new(CONTRACT),
            })
            .unwrap();
        events_tx.send(SubscriberEvent::Log(log(CONTRACT, 10, 0, 0))).await.unwrap();
        heads.deliver(chain(8, 10));

        let handle = {
            let heads = heads.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { relayer.run(commands_rx, events_rx, &heads, &cancel).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(listener.delivered(), vec![(10, 0)]);
    }
}
