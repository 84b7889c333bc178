use super::{ChainClient, ClientError, LogFilter, Metrics, Subscription};
use alloy_eips::BlockNumberOrTag;
use alloy_primitives::ChainId;
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_types_eth::Filter;
use async_trait::async_trait;
use chainwatch_metrics::observe_metrics_for_result_async;
use chainwatch_types::{Head, LogRecord};
use futures::StreamExt;
use tracing::{debug, info};

/// [`ChainClient`] backed by an alloy [`RootProvider`].
///
/// Subscriptions need a pubsub transport, so the provider is usually connected over websocket.
/// Every header is stamped with the chain id the remote node reported when the client was
/// connected.
#[derive(Debug, Clone)]
pub struct AlloyChainClient {
    provider: RootProvider,
    chain_id: ChainId,
}

impl AlloyChainClient {
    /// Creates a client for a provider known to serve `chain_id`.
    pub const fn new(provider: RootProvider, chain_id: ChainId) -> Self {
        Self { provider, chain_id }
    }

    /// Connects to `url` and asks the remote node for its chain id.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let provider = RootProvider::connect(url).await?;
        let chain_id = observe_metrics_for_result_async!(
            Metrics::RPC_REQUESTS_SUCCESS_TOTAL,
            Metrics::RPC_REQUESTS_ERROR_TOTAL,
            Metrics::RPC_REQUEST_DURATION_SECONDS,
            Metrics::RPC_METHOD_CHAIN_ID,
            provider.get_chain_id()
        )?;
        info!(target: "chainwatch::client", url, chain_id, "Connected to remote node");
        Ok(Self::new(provider, chain_id))
    }

    /// Enables metrics for the client.
    pub fn with_metrics(self) -> Self {
        Metrics::init();
        self
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn header_by_number(&self, number: Option<u64>) -> Result<Head, ClientError> {
        let tag = number.map_or(BlockNumberOrTag::Latest, BlockNumberOrTag::Number);
        observe_metrics_for_result_async!(
            Metrics::RPC_REQUESTS_SUCCESS_TOTAL,
            Metrics::RPC_REQUESTS_ERROR_TOTAL,
            Metrics::RPC_REQUEST_DURATION_SECONDS,
            Metrics::RPC_METHOD_HEADER_BY_NUMBER,
            async {
                let block = self
                    .provider
                    .get_block_by_number(tag)
                    .await?
                    .ok_or(ClientError::BlockNotFound(tag))?;
                Ok::<_, ClientError>(Head::from(block.header).with_chain_id(self.chain_id))
            }
        )
    }

    async fn subscribe_new_heads(&self) -> Result<Subscription<Head>, ClientError> {
        let subscription = observe_metrics_for_result_async!(
            Metrics::RPC_REQUESTS_SUCCESS_TOTAL,
            Metrics::RPC_REQUESTS_ERROR_TOTAL,
            Metrics::RPC_REQUEST_DURATION_SECONDS,
            Metrics::RPC_METHOD_SUBSCRIBE_NEW_HEADS,
            self.provider.subscribe_blocks()
        )?;
        debug!(target: "chainwatch::client", "Subscribed to new heads");

        let chain_id = self.chain_id;
        let heads =
            subscription.into_stream().map(move |header| Ok(Head::from(header).with_chain_id(chain_id)));
        Ok(Subscription::new(heads))
    }

    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<LogRecord>, ClientError> {
        let filter = Filter::from(filter);
        observe_metrics_for_result_async!(
            Metrics::RPC_REQUESTS_SUCCESS_TOTAL,
            Metrics::RPC_REQUESTS_ERROR_TOTAL,
            Metrics::RPC_REQUEST_DURATION_SECONDS,
            Metrics::RPC_METHOD_FILTER_LOGS,
            async {
                let logs = self.provider.get_logs(&filter).await?;
                logs.into_iter()
                    .map(|log| LogRecord::try_from(log).map_err(ClientError::from))
                    .collect::<Result<Vec<LogRecord>, ClientError>>()
            }
        )
    }

    async fn subscribe_filter_logs(
        &self,
        filter: &LogFilter,
    ) -> Result<Subscription<LogRecord>, ClientError> {
        let rpc_filter =
            Filter::from(&LogFilter { from_block: None, to_block: None, ..filter.clone() });
        let subscription = observe_metrics_for_result_async!(
            Metrics::RPC_REQUESTS_SUCCESS_TOTAL,
            Metrics::RPC_REQUESTS_ERROR_TOTAL,
            Metrics::RPC_REQUEST_DURATION_SECONDS,
            Metrics::RPC_METHOD_SUBSCRIBE_FILTER_LOGS,
            self.provider.subscribe_logs(&rpc_filter)
        )?;
        debug!(
            target: "chainwatch::client",
            addresses = filter.addresses.len(),
            "Subscribed to logs"
        );

        let logs = subscription
            .into_stream()
            .map(|log| LogRecord::try_from(log).map_err(ClientError::from));
        Ok(Subscription::new(logs))
    }
}
