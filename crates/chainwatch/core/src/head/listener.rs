//! Owns the live subscription to new heads.
//!
//! The listener alternates between subscribing (retrying with backoff until the remote node
//! accepts or a stop is requested) and receiving heads until the subscription fails. Only one
//! subscription is active at a time and it is always torn down before the listener returns.

use super::{HeadListenerError, Metrics};
use crate::{
    HeadTrackerConfig,
    client::{ChainClient, Subscription, with_timeout},
};
use async_trait::async_trait;
use backon::Retryable;
use chainwatch_types::Head;
use std::{
    ops::ControlFlow,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Receives every head accepted by a [`HeadListener`].
#[async_trait]
pub trait HeadHandler: Send + Sync {
    /// Handles a head received from the remote node.
    async fn handle_new_head(&self, head: Head);
}

/// Subscribes to new heads and hands them to a [`HeadHandler`].
#[derive(Debug)]
pub struct HeadListener<C> {
    client: C,
    config: Arc<HeadTrackerConfig>,
    connected: AtomicBool,
    receiving_heads: AtomicBool,
}

impl<C> HeadListener<C>
where
    C: ChainClient,
{
    /// Creates a listener that is not yet subscribed.
    pub const fn new(client: C, config: Arc<HeadTrackerConfig>) -> Self {
        Self {
            client,
            config,
            connected: AtomicBool::new(false),
            receiving_heads: AtomicBool::new(false),
        }
    }

    /// Whether the head subscription is established.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Whether heads keep arriving within the idle warning threshold.
    pub fn receiving_heads(&self) -> bool {
        self.receiving_heads.load(Ordering::Acquire)
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
        metrics::gauge!(Metrics::LISTENER_CONNECTED).set(connected as u8 as f64);
    }

    fn set_receiving_heads(&self, receiving: bool) {
        self.receiving_heads.store(receiving, Ordering::Release);
        metrics::gauge!(Metrics::LISTENER_RECEIVING_HEADS).set(receiving as u8 as f64);
    }

    /// Listens for new heads until `cancel` fires.
    ///
    /// Subscription failures are retried indefinitely. The only error returned is a head from a
    /// chain other than the configured one, which no amount of retrying can fix.
    pub async fn listen_for_new_heads<H>(
        &self,
        handler: &H,
        cancel: &CancellationToken,
    ) -> Result<(), HeadListenerError>
    where
        H: HeadHandler + ?Sized,
    {
        let mut resubscribing = false;
        loop {
            if resubscribing {
                metrics::counter!(Metrics::LISTENER_RESUBSCRIBE_TOTAL).increment(1);
            }
            resubscribing = true;

            let Some(subscription) = self.subscribe(cancel).await else {
                info!(target: "chainwatch::head_listener", "Stopped before subscribing to new heads");
                return Ok(());
            };

            let received = self.receive_headers(subscription, handler, cancel).await;
            self.set_connected(false);
            self.set_receiving_heads(false);

            match received? {
                ControlFlow::Break(()) => {
                    info!(target: "chainwatch::head_listener", "Head listener stopped");
                    return Ok(());
                }
                ControlFlow::Continue(()) => continue,
            }
        }
    }

    /// Subscribes with backoff. Returns `None` if cancelled first.
    async fn subscribe(&self, cancel: &CancellationToken) -> Option<Subscription<Head>> {
        let rpc_timeout = self.config.rpc_timeout;
        let attempt = || with_timeout(rpc_timeout, self.client.subscribe_new_heads());

        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            subscribed = attempt
                .retry(self.config.retry.backoff())
                .notify(|err, delay| {
                    warn!(
                        target: "chainwatch::head_listener",
                        %err,
                        ?delay,
                        "Failed to subscribe to new heads, retrying"
                    );
                }) => match subscribed {
                    Ok(subscription) => {
                        info!(target: "chainwatch::head_listener", "Subscribed to new heads");
                        Some(subscription)
                    }
                    Err(err) => {
                        error!(target: "chainwatch::head_listener", %err, "Gave up subscribing to new heads");
                        None
                    }
                }
        }
    }

    /// Receives heads until the subscription fails (`Continue`) or `cancel` fires (`Break`).
    async fn receive_headers<H>(
        &self,
        mut subscription: Subscription<Head>,
        handler: &H,
        cancel: &CancellationToken,
    ) -> Result<ControlFlow<()>, HeadListenerError>
    where
        H: HeadHandler + ?Sized,
    {
        self.set_connected(true);
        self.set_receiving_heads(true);

        let idle_threshold = self.config.block_emission_idle_warning_threshold;
        let idle_alarm = tokio::time::sleep(idle_threshold.unwrap_or(Duration::MAX));
        tokio::pin!(idle_alarm);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    subscription.unsubscribe();
                    return Ok(ControlFlow::Break(()));
                }
                _ = &mut idle_alarm, if idle_threshold.is_some() && self.receiving_heads() => {
                    warn!(
                        target: "chainwatch::head_listener",
                        threshold = ?idle_threshold,
                        "No new heads received within the idle threshold, the remote node may be stuck"
                    );
                    self.set_receiving_heads(false);
                }
                item = subscription.next() => match item {
                    Some(Ok(head)) => {
                        if head.evm_chain_id != Some(self.config.chain_id) {
                            error!(
                                target: "chainwatch::head_listener",
                                expected = self.config.chain_id,
                                actual = ?head.evm_chain_id,
                                number = head.number,
                                "Remote node serves a different chain, check the configured chain id"
                            );
                            subscription.unsubscribe();
                            return Err(HeadListenerError::ChainIdMismatch {
                                expected: self.config.chain_id,
                                actual: head.evm_chain_id,
                            });
                        }

                        if let Some(threshold) = idle_threshold {
                            idle_alarm.as_mut().reset(Instant::now() + threshold);
                        }
                        self.set_receiving_heads(true);

                        debug!(target: "chainwatch::head_listener", number = head.number, hash = %head.hash, "Received head");
                        handler.handle_new_head(head).await;
                    }
                    Some(Err(err)) => {
                        warn!(target: "chainwatch::head_listener", %err, "Head subscription failed, resubscribing");
                        return Ok(ControlFlow::Continue(()));
                    }
                    None => {
                        warn!(target: "chainwatch::head_listener", "Head subscription closed, resubscribing");
                        return Ok(ControlFlow::Continue(()));
                    }
                }
            }
        }
    }
}
