//! Owns the live log subscription for the watched contracts.
//!
//! The set of watched contracts is reference counted. A contract appearing or disappearing
//! schedules a resubscribe once the set has been quiet for the configured debounce period.
//! Every subscribe is followed by a backfill of the recent blocks, so the stream handed to the
//! relayer may repeat logs around the point where the live subscription takes over.

use super::Metrics;
use crate::{
    LogBroadcasterConfig,
    client::{ChainClient, ClientError, LogFilter, Subscription, with_timeout},
};
use alloy_primitives::{Address, map::HashMap};
use backon::Retryable;
use chainwatch_types::LogRecord;
use std::{
    fmt,
    ops::{ControlFlow, RangeInclusive},
    pin::Pin,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tokio::{
    sync::{mpsc, watch},
    time::Sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What the subscriber reports to the relayer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SubscriberEvent {
    /// The log subscription is established.
    Connected,
    /// The log subscription is lost.
    Disconnected,
    /// A log of a watched contract.
    Log(LogRecord),
    /// A log dropped from the chain by a reorg.
    Removed(LogRecord),
}

/// Keeps one log subscription for the watched contracts alive.
pub(crate) struct LogSubscriber<C> {
    client: C,
    config: Arc<LogBroadcasterConfig>,
    contracts: Mutex<HashMap<Address, usize>>,
    contracts_changed: watch::Sender<u64>,
    connected: AtomicBool,
    highest_seen: AtomicU64,
    replay_from: Mutex<Option<u64>>,
}

impl<C> LogSubscriber<C>
where
    C: ChainClient,
{
    pub(crate) fn new(client: C, config: Arc<LogBroadcasterConfig>) -> Self {
        let replay_from = config.replay_from_block;
        Self {
            client,
            config,
            contracts: Mutex::new(HashMap::default()),
            contracts_changed: watch::Sender::new(0),
            connected: AtomicBool::new(false),
            highest_seen: AtomicU64::new(0),
            replay_from: Mutex::new(replay_from),
        }
    }

    fn contracts(&self) -> MutexGuard<'_, HashMap<Address, usize>> {
        self.contracts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn replay_from(&self) -> MutexGuard<'_, Option<u64>> {
        self.replay_from.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts watching `address`, or adds a reference to it.
    pub(crate) fn add_contract(&self, address: Address) {
        let mut contracts = self.contracts();
        let count = contracts.entry(address).or_default();
        *count += 1;
        if *count == 1 {
            debug!(target: "chainwatch::log_subscriber", %address, "Watching new contract");
            self.notify_contracts_changed();
        }
    }

    /// Drops a reference to `address`, and stops watching it once unreferenced.
    pub(crate) fn remove_contract(&self, address: Address) {
        let mut contracts = self.contracts();
        let Some(count) = contracts.get_mut(&address) else { return };
        *count -= 1;
        if *count == 0 {
            contracts.remove(&address);
            debug!(target: "chainwatch::log_subscriber", %address, "Stopped watching contract");
            self.notify_contracts_changed();
        }
    }

    /// Watched contracts, sorted.
    pub(crate) fn watched(&self) -> Vec<Address> {
        let mut addresses: Vec<_> = self.contracts().keys().copied().collect();
        addresses.sort_unstable();
        addresses
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
        metrics::gauge!(Metrics::CONNECTED).set(connected as u8 as f64);
    }

    /// Makes the next backfill start at `block_number` and resubscribes.
    pub(crate) fn replay_from_block(&self, block_number: u64) {
        *self.replay_from() = Some(block_number);
        info!(target: "chainwatch::log_subscriber", block_number, "Replaying logs");
        self.notify_contracts_changed();
    }

    fn notify_contracts_changed(&self) {
        self.contracts_changed.send_modify(|version| *version = version.wrapping_add(1));
    }

    /// Keeps the subscription alive until `cancel` fires or the relayer goes away.
    pub(crate) async fn run(
        &self,
        events: mpsc::Sender<SubscriberEvent>,
        cancel: &CancellationToken,
    ) {
        let mut changes = self.contracts_changed.subscribe();
        let mut resubscribing = false;
        loop {
            let Some(addresses) = self.wait_for_contracts(&mut changes, cancel).await else {
                return;
            };

            if resubscribing {
                metrics::counter!(Metrics::RESUBSCRIBE_TOTAL).increment(1);
            }
            resubscribing = true;

            let filter = LogFilter::new(addresses);
            let Some(subscription) = self.subscribe(&filter, cancel).await else { return };

            self.set_connected(true);
            if events.send(SubscriberEvent::Connected).await.is_err() {
                subscription.unsubscribe();
                self.set_connected(false);
                return;
            }

            let mut flow = self.backfill(&filter, &events, cancel).await;
            if flow.is_continue() {
                flow = self.receive_logs(subscription, &events, &mut changes, cancel).await;
            }

            self.set_connected(false);
            if events.send(SubscriberEvent::Disconnected).await.is_err() || flow.is_break() {
                return;
            }
        }
    }

    /// Waits until at least one contract is watched. Returns `None` if cancelled first.
    async fn wait_for_contracts(
        &self,
        changes: &mut watch::Receiver<u64>,
        cancel: &CancellationToken,
    ) -> Option<Vec<Address>> {
        loop {
            changes.mark_unchanged();
            let addresses = self.watched();
            if !addresses.is_empty() {
                return Some(addresses);
            }

            debug!(target: "chainwatch::log_subscriber", "No contract to watch, waiting");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = changes.changed() => {}
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.config.resubscribe_debounce) => {}
            }
        }
    }

    /// Subscribes with backoff. Returns `None` if cancelled first.
    async fn subscribe(
        &self,
        filter: &LogFilter,
        cancel: &CancellationToken,
    ) -> Option<Subscription<LogRecord>> {
        let rpc_timeout = self.config.rpc_timeout;
        let attempt = || with_timeout(rpc_timeout, self.client.subscribe_filter_logs(filter));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            subscribed = attempt
                .retry(self.config.retry.backoff())
                .notify(|err, delay| {
                    warn!(target: "chainwatch::log_subscriber", %err, ?delay, "Failed to subscribe to logs, retrying");
                }) => match subscribed {
                    Ok(subscription) => {
                        info!(
                            target: "chainwatch::log_subscriber",
                            contracts = filter.addresses.len(),
                            "Subscribed to logs"
                        );
                        Some(subscription)
                    }
                    Err(err) => {
                        error!(target: "chainwatch::log_subscriber", %err, "Gave up subscribing to logs");
                        None
                    }
                }
        }
    }

    /// Fetches and forwards the logs of the recent blocks, one window of blocks at a time.
    ///
    /// A request that keeps failing postpones the rest of the backfill to the next subscribe,
    /// starting at the window that failed, and lets live logs through meanwhile.
    async fn backfill(
        &self,
        filter: &LogFilter,
        events: &mpsc::Sender<SubscriberEvent>,
        cancel: &CancellationToken,
    ) -> ControlFlow<()> {
        let replay = *self.replay_from();
        let rpc_timeout = self.config.rpc_timeout;
        let backoff = self.config.retry.backoff().with_max_times(self.config.backfill_attempts);

        let fetch_latest = || async move {
            Ok::<_, ClientError>(
                with_timeout(rpc_timeout, self.client.header_by_number(None)).await?.number,
            )
        };
        let latest = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ControlFlow::Break(()),
            latest = fetch_latest
                .retry(backoff)
                .notify(|err, delay| {
                    warn!(target: "chainwatch::log_subscriber", %err, ?delay, "Failed to fetch latest block, retrying");
                }) => latest,
        };
        let latest = match latest {
            Ok(latest) => latest,
            Err(err) => {
                error!(target: "chainwatch::log_subscriber", %err, "Gave up fetching latest block, skipping backfill");
                return ControlFlow::Continue(());
            }
        };

        let highest_seen = self.highest_seen.load(Ordering::Acquire);
        let from = replay
            .unwrap_or_else(|| latest.saturating_sub(self.config.backfill_depth).max(highest_seen));
        let mut backfilled = 0;

        for range in block_ranges(from, latest, self.config.max_block_range) {
            let (start, end) = (*range.start(), *range.end());
            let window = filter.clone().with_range(start, end);
            let fetch = || with_timeout(rpc_timeout, self.client.filter_logs(&window));

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ControlFlow::Break(()),
                fetched = fetch
                    .retry(backoff)
                    .notify(|err, delay| {
                        warn!(
                            target: "chainwatch::log_subscriber",
                            %err,
                            ?delay,
                            start,
                            end,
                            "Failed to backfill logs, retrying"
                        );
                    }) => fetched,
            };
            let mut logs = match fetched {
                Ok(logs) => logs,
                Err(err) => {
                    error!(
                        target: "chainwatch::log_subscriber",
                        %err,
                        start,
                        end,
                        "Gave up backfilling logs, resuming from this block on the next subscribe"
                    );
                    *self.replay_from() = Some(start);
                    return ControlFlow::Continue(());
                }
            };

            logs.retain(|log| !log.removed);
            logs.sort_by_key(|log| (log.block_number, log.log_index));
            backfilled += logs.len();
            metrics::counter!(Metrics::LOGS_BACKFILLED_TOTAL).increment(logs.len() as u64);

            for log in logs {
                if events.send(SubscriberEvent::Log(log)).await.is_err() {
                    return ControlFlow::Break(());
                }
            }
            self.highest_seen.fetch_max(end, Ordering::AcqRel);
        }

        if replay.is_some() {
            let mut pending = self.replay_from();
            if *pending == replay {
                *pending = None;
            }
        }
        debug!(
            target: "chainwatch::log_subscriber",
            from,
            to = latest,
            logs = backfilled,
            "Backfilled logs"
        );
        ControlFlow::Continue(())
    }

    /// Forwards live logs until the subscription fails or the watched contracts change
    /// (`Continue`), or until `cancel` fires or the relayer goes away (`Break`).
    async fn receive_logs(
        &self,
        mut subscription: Subscription<LogRecord>,
        events: &mpsc::Sender<SubscriberEvent>,
        changes: &mut watch::Receiver<u64>,
        cancel: &CancellationToken,
    ) -> ControlFlow<()> {
        let mut debounce: Option<Pin<Box<Sleep>>> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    subscription.unsubscribe();
                    return ControlFlow::Break(());
                }
                _ = changes.changed() => {
                    debounce = Some(Box::pin(tokio::time::sleep(self.config.resubscribe_debounce)));
                }
                _ = debounced(&mut debounce), if debounce.is_some() => {
                    info!(target: "chainwatch::log_subscriber", "Watched contracts changed, resubscribing");
                    subscription.unsubscribe();
                    return ControlFlow::Continue(());
                }
                item = subscription.next() => match item {
                    Some(Ok(log)) => {
                        let event = if log.removed {
                            debug!(target: "chainwatch::log_subscriber", %log, "Log removed by reorg");
                            SubscriberEvent::Removed(log)
                        } else {
                            self.highest_seen.fetch_max(log.block_number, Ordering::AcqRel);
                            SubscriberEvent::Log(log)
                        };
                        if events.send(event).await.is_err() {
                            subscription.unsubscribe();
                            return ControlFlow::Break(());
                        }
                    }
                    Some(Err(err)) => {
                        warn!(target: "chainwatch::log_subscriber", %err, "Log subscription failed, resubscribing");
                        return ControlFlow::Continue(());
                    }
                    None => {
                        warn!(target: "chainwatch::log_subscriber", "Log subscription closed, resubscribing");
                        return ControlFlow::Continue(());
                    }
                }
            }
        }
    }
}

/// Splits `from..=to` into consecutive ranges of at most `max_block_range` blocks.
fn block_ranges(
    from: u64,
    to: u64,
    max_block_range: u64,
) -> impl Iterator<Item = RangeInclusive<u64>> {
    let size = max_block_range.max(1);
    let mut next = (from <= to).then_some(from);
    std::iter::from_fn(move || {
        let start = next?;
        let end = start.saturating_add(size - 1).min(to);
        next = (end < to).then(|| end + 1);
        Some(start..=end)
    })
}

/// Completes once the pending debounce timer fires. Never completes without one.
async fn debounced(debounce: &mut Option<Pin<Box<Sleep>>>) {
    match debounce {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

impl<C: fmt::Debug> fmt::Debug for LogSubscriber<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSubscriber")
            .field("client", &self.client)
            .field("config", &self.config)
            .field("connected", &self.connected)
            .field("highest_seen", &self.highest_seen)
            .finish_non_exhaustive()
    }
}
