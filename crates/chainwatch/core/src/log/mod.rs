//! Confirmation-gated delivery of contract logs to registered listeners.

mod broadcast;
pub use broadcast::Broadcast;

mod broadcaster;
pub use broadcaster::LogBroadcaster;

mod decoding;
pub use decoding::{DecodedLogListener, DecodingListener};

mod error;
pub use error::{DecodeError, LogBroadcasterError};

mod listener;
pub use listener::{ListenerOpts, LogListener};

mod metrics;
pub(crate) use metrics::Metrics;

mod relayer;
pub(crate) use relayer::{LogRelayer, RelayerCommand};

mod subscriber;
pub(crate) use subscriber::{LogSubscriber, SubscriberEvent};
