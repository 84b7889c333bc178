//! Consumers of confirmed logs.

use super::Broadcast;
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use auto_impl::auto_impl;
use chainwatch_types::{JobId, LogRecord};
use std::fmt;

/// Receives the logs of the contracts it is registered for, once they are confirmed.
#[async_trait]
#[auto_impl(&, Arc)]
pub trait LogListener: Send + Sync + fmt::Debug {
    /// Called when the log subscription is established.
    fn on_connect(&self) {}

    /// Called when the log subscription is lost.
    fn on_disconnect(&self) {}

    /// Handles a confirmed log.
    ///
    /// The same log may be handed over more than once, for instance after a restart or a
    /// resubscribe. Implementations check [`Broadcast::was_already_consumed`] and call
    /// [`Broadcast::mark_consumed`] once the log is handled.
    async fn handle_log(&self, broadcast: Broadcast);

    /// Job owning the listener. Consumption records are kept per job.
    fn job_id(&self) -> JobId;
}

/// What a [`LogListener`] is registered for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerOpts {
    /// Contract whose logs are delivered.
    pub contract: Address,
    /// Accepted event ids. Empty accepts every event of the contract.
    pub topics: Vec<B256>,
    /// Number of blocks, the including one counted, required before a log is delivered.
    pub min_confirmations: u64,
}

impl ListenerOpts {
    /// Listens to every event of `contract` with a single confirmation.
    pub const fn new(contract: Address) -> Self {
        Self { contract, topics: Vec::new(), min_confirmations: 1 }
    }

    /// Restricts delivery to the given event ids.
    pub fn with_topics(mut self, topics: impl IntoIterator<Item = B256>) -> Self {
        self.topics = topics.into_iter().collect();
        self
    }

    /// Sets the required number of confirmations.
    pub const fn with_min_confirmations(mut self, min_confirmations: u64) -> Self {
        self.min_confirmations = min_confirmations;
        self
    }

    /// Required confirmations, at least one.
    pub fn confirmations(&self) -> u64 {
        self.min_confirmations.max(1)
    }

    /// Whether `log` is one of the logs these options select.
    pub fn matches(&self, log: &LogRecord) -> bool {
        log.address == self.contract &&
            (self.topics.is_empty() ||
                log.event_id().is_some_and(|event_id| self.topics.contains(&event_id)))
    }
}
