//! Core logic of chainwatch.
//!
//! [`HeadTracker`] follows the head of a chain, persists recent heads and hands every new longest
//! chain to a [`HeadBroadcaster`]. [`LogBroadcaster`] subscribes to the logs of registered
//! contracts and delivers each one to its listeners once it has enough confirmations.

pub mod client;
pub use client::{AlloyChainClient, ChainClient, ClientError, LogFilter, Subscription, with_timeout};

mod config;
pub use config::{ConfigError, HeadTrackerConfig, LogBroadcasterConfig, RetryConfig};

pub mod head;
pub use head::{
    BackfillError, DEFAULT_CALLBACK_TIMEOUT, HeadBroadcastable, HeadBroadcaster, HeadHandler,
    HeadListener, HeadListenerError, HeadSaver, HeadTrackable, HeadTracker, HeadTrackerError,
    Unsubscriber,
};

pub mod log;
pub use log::{
    Broadcast, DecodeError, DecodedLogListener, DecodingListener, ListenerOpts, LogBroadcaster,
    LogBroadcasterError, LogListener,
};

mod mailbox;
pub use mailbox::Mailbox;

#[cfg(test)]
pub(crate) mod test_utils;
