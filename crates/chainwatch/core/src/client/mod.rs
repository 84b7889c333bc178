//! Port to the remote node that supplies headers and logs.

use alloy_eips::BlockNumberOrTag;
use alloy_primitives::{Address, B256, ChainId};
use alloy_rpc_types_eth::Filter;
use async_trait::async_trait;
use auto_impl::auto_impl;
use chainwatch_types::{Head, LogConversionError, LogRecord};
use futures::{Stream, StreamExt, stream::BoxStream};
use std::{fmt, future::Future, time::Duration};
use thiserror::Error;

mod alloy;
pub use alloy::AlloyChainClient;

mod metrics;
pub(crate) use metrics::Metrics;

/// Errors returned by a [`ChainClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport or the remote node failed.
    #[error(transparent)]
    Rpc(#[from] alloy_transport::TransportError),

    /// The remote node does not know the requested block.
    #[error("block not found: {0}")]
    BlockNotFound(BlockNumberOrTag),

    /// A log returned by the remote node lacks block placement.
    #[error(transparent)]
    InvalidLog(#[from] LogConversionError),

    /// The call did not complete in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The subscription was closed by the remote side.
    #[error("subscription closed")]
    SubscriptionClosed,
}

/// Runs `fut`, failing with [`ClientError::Timeout`] once `timeout` elapses.
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    tokio::time::timeout(timeout, fut).await.map_err(|_| ClientError::Timeout(timeout))?
}

/// A live stream of items pushed by the remote node.
///
/// An `Err` item reports a failure of the subscription and the end of the stream means it was
/// closed. Either way the subscription has to be re-established.
pub struct Subscription<T> {
    stream: BoxStream<'static, Result<T, ClientError>>,
}

impl<T> Subscription<T> {
    /// Wraps a stream of items.
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<T, ClientError>> + Send + 'static,
    {
        Self { stream: stream.boxed() }
    }

    /// Waits for the next item.
    pub async fn next(&mut self) -> Option<Result<T, ClientError>> {
        self.stream.next().await
    }

    /// Tears the subscription down.
    pub fn unsubscribe(self) {}
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Selects logs by emitting contract, event id and block range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    /// Contracts whose logs are wanted. Empty matches every contract, so the log subscriber only
    /// subscribes once at least one contract is watched.
    pub addresses: Vec<Address>,
    /// Accepted first topics. Empty accepts every event.
    pub event_ids: Vec<B256>,
    /// First block of the range, inclusive.
    pub from_block: Option<u64>,
    /// Last block of the range, inclusive.
    pub to_block: Option<u64>,
}

impl LogFilter {
    /// Creates a filter for the logs of `addresses`.
    pub const fn new(addresses: Vec<Address>) -> Self {
        Self { addresses, event_ids: Vec::new(), from_block: None, to_block: None }
    }

    /// Restricts the filter to the given block range.
    pub const fn with_range(mut self, from_block: u64, to_block: u64) -> Self {
        self.from_block = Some(from_block);
        self.to_block = Some(to_block);
        self
    }
}

impl From<&LogFilter> for Filter {
    fn from(filter: &LogFilter) -> Self {
        let mut converted = Self::new().address(filter.addresses.clone());
        if !filter.event_ids.is_empty() {
            converted = converted.event_signature(filter.event_ids.clone());
        }
        if let Some(from_block) = filter.from_block {
            converted = converted.from_block(from_block);
        }
        if let Some(to_block) = filter.to_block {
            converted = converted.to_block(to_block);
        }
        converted
    }
}

/// Minimal surface of a remote node needed to track heads and deliver logs.
#[async_trait]
#[auto_impl(&, Arc)]
pub trait ChainClient: Send + Sync + fmt::Debug {
    /// Chain id reported by the remote node.
    fn chain_id(&self) -> ChainId;

    /// Fetches the header at `number`, or the latest header for `None`.
    async fn header_by_number(&self, number: Option<u64>) -> Result<Head, ClientError>;

    /// Subscribes to new headers.
    async fn subscribe_new_heads(&self) -> Result<Subscription<Head>, ClientError>;

    /// Fetches the logs matching `filter`.
    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<LogRecord>, ClientError>;

    /// Subscribes to new logs matching `filter`. The block range of the filter is ignored.
    async fn subscribe_filter_logs(
        &self,
        filter: &LogFilter,
    ) -> Result<Subscription<LogRecord>, ClientError>;
}
