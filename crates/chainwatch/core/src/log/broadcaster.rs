use super::{
    ListenerOpts, LogBroadcasterError, LogListener, LogRelayer, LogSubscriber, Metrics,
    RelayerCommand,
};
use crate::{HeadTrackable, LogBroadcasterConfig, Mailbox, client::ChainClient};
use alloy_primitives::{Address, map::HashSet};
use async_trait::async_trait;
use chainwatch_storage::LogStorage;
use chainwatch_types::{Head, JobId};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Capacity of the channel between the subscriber and the relayer.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 1024;

/// Delivers the logs of watched contracts to registered listeners once confirmed.
///
/// Register listeners with [`LogBroadcaster::register`], subscribe the broadcaster to a head
/// broadcaster so it learns about new heads, and drive it with [`LogBroadcaster::run`].
#[derive(Debug)]
pub struct LogBroadcaster<C> {
    subscriber: LogSubscriber<C>,
    db: Arc<dyn LogStorage>,
    config: Arc<LogBroadcasterConfig>,
    registered: Mutex<HashSet<(Address, JobId)>>,
    commands: mpsc::UnboundedSender<RelayerCommand>,
    pending_commands: Mutex<Option<mpsc::UnboundedReceiver<RelayerCommand>>>,
    heads: Mailbox<Head>,
}

impl<C> LogBroadcaster<C>
where
    C: ChainClient,
{
    /// Creates a broadcaster. The configuration is validated first.
    pub fn new(
        config: LogBroadcasterConfig,
        client: C,
        db: Arc<dyn LogStorage>,
    ) -> Result<Self, LogBroadcasterError> {
        config.validate()?;
        let config = Arc::new(config);
        let (commands, pending_commands) = mpsc::unbounded_channel();
        Ok(Self {
            subscriber: LogSubscriber::new(client, config.clone()),
            db,
            config,
            registered: Mutex::new(HashSet::default()),
            commands,
            pending_commands: Mutex::new(Some(pending_commands)),
            heads: Mailbox::new(1),
        })
    }

    /// Enables metrics for the broadcaster.
    pub fn with_metrics(self) -> Self {
        Metrics::init();
        self
    }

    fn registered(&self) -> MutexGuard<'_, HashSet<(Address, JobId)>> {
        self.registered.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `listener` for the logs selected by `opts`.
    ///
    /// Returns whether the log subscription is currently connected. If it is not, the listener's
    /// `on_connect` is called once it is.
    pub fn register(
        &self,
        listener: Arc<dyn LogListener>,
        opts: ListenerOpts,
    ) -> Result<bool, LogBroadcasterError> {
        let (address, job_id) = (opts.contract, listener.job_id());
        if !self.registered().insert((address, job_id)) {
            return Err(LogBroadcasterError::AlreadyRegistered { address, job_id });
        }

        if self.commands.send(RelayerCommand::Register { listener, opts }).is_err() {
            self.registered().remove(&(address, job_id));
            return Err(LogBroadcasterError::Stopped);
        }
        self.subscriber.add_contract(address);

        debug!(target: "chainwatch::log_broadcaster", %address, job_id, "Registered listener");
        Ok(self.is_connected())
    }

    /// Unregisters the listener of `job_id` from `address`. Returns whether it was registered.
    pub fn unregister(&self, address: Address, job_id: JobId) -> bool {
        if !self.registered().remove(&(address, job_id)) {
            return false;
        }

        // A stopped relayer has no registrations left to remove.
        let _ = self.commands.send(RelayerCommand::Unregister { address, job_id });
        self.subscriber.remove_contract(address);
        debug!(target: "chainwatch::log_broadcaster", %address, job_id, "Unregistered listener");
        true
    }

    /// Whether the log subscription is established.
    pub fn is_connected(&self) -> bool {
        self.subscriber.is_connected()
    }

    /// Fetches the logs again starting at `block_number`, then resumes live delivery.
    pub fn replay_from_block(&self, block_number: u64) {
        self.subscriber.replay_from_block(block_number);
    }

    /// Runs the subscriber and the relayer until `cancel` fires. Can only be called once.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), LogBroadcasterError> {
        let commands = self
            .pending_commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(LogBroadcasterError::AlreadyStarted)?;

        info!(target: "chainwatch::log_broadcaster", "Log broadcaster started");
        let (events_tx, events_rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let relayer = LogRelayer::new(self.db.clone(), self.config.clone());

        tokio::join!(
            self.subscriber.run(events_tx, &cancel),
            relayer.run(commands, events_rx, &self.heads, &cancel),
        );
        info!(target: "chainwatch::log_broadcaster", "Log broadcaster stopped");
        Ok(())
    }
}

#[async_trait]
impl<C> HeadTrackable for LogBroadcaster<C>
where
    C: ChainClient,
{
    async fn on_new_longest_chain(&self, head: Head) {
        self.heads.deliver(head);
    }
}
