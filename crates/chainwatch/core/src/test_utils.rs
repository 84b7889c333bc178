//! Shared helpers for unit tests.

use crate::client::{ChainClient, ClientError, LogFilter, Subscription};
use alloy_primitives::{Address, B256, Bytes, ChainId};
use async_trait::async_trait;
use chainwatch_storage::ChainDb;
use chainwatch_types::{Head, LogRecord};
use futures::StreamExt;
use mockall::mock;
use std::sync::Arc;
use tempfile::TempDir;

/// Chain id stamped on every test head.
pub(crate) const CHAIN_ID: ChainId = 1;

mock!(
    #[derive(Debug)]
    pub Client {}

    #[async_trait]
    impl ChainClient for Client {
        fn chain_id(&self) -> ChainId;
        async fn header_by_number(&self, number: Option<u64>) -> Result<Head, ClientError>;
        async fn subscribe_new_heads(&self) -> Result<Subscription<Head>, ClientError>;
        async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<LogRecord>, ClientError>;
        async fn subscribe_filter_logs(
            &self,
            filter: &LogFilter,
        ) -> Result<Subscription<LogRecord>, ClientError>;
    }
);

/// Hash of block `number` on fork `fork`. Fork 0 is the canonical chain.
pub(crate) fn hash(number: u64, fork: u8) -> B256 {
    let mut bytes = [0xa0 + fork; 32];
    bytes[24..].copy_from_slice(&number.to_be_bytes());
    B256::from(bytes)
}

/// Canonical head at `number`.
pub(crate) fn head(number: u64) -> Head {
    fork_head(number, 0, 0)
}

/// Head at `number` on `fork`, whose parent lives on `parent_fork`.
pub(crate) fn fork_head(number: u64, fork: u8, parent_fork: u8) -> Head {
    Head::new(number, hash(number, fork), hash(number.wrapping_sub(1), parent_fork), number * 12)
        .with_chain_id(CHAIN_ID)
}

/// Canonical chain from `from` to `to`, both inclusive, linked through parents.
pub(crate) fn chain(from: u64, to: u64) -> Head {
    let mut chain = head(from);
    for number in from + 1..=to {
        chain = head(number).with_parent(chain).expect("linked chain");
    }
    chain
}

/// Log emitted by `address` in block `number` of `fork`.
pub(crate) fn log(address: Address, number: u64, fork: u8, index: u64) -> LogRecord {
    LogRecord {
        address,
        topics: vec![B256::repeat_byte(0xee)],
        data: Bytes::new(),
        block_hash: hash(number, fork),
        block_number: number,
        tx_hash: B256::with_last_byte(index as u8),
        log_index: index,
        removed: false,
    }
}

/// Opens a database in a fresh temporary directory.
pub(crate) fn temp_db() -> (TempDir, Arc<ChainDb>) {
    let dir = TempDir::new().expect("temp dir");
    let db = ChainDb::new(CHAIN_ID, dir.path()).expect("open database");
    (dir, Arc::new(db))
}

/// A subscription yielding `items` and then staying open.
pub(crate) fn open_subscription<T: Send + 'static>(items: Vec<T>) -> Subscription<T> {
    Subscription::new(
        futures::stream::iter(items.into_iter().map(Ok)).chain(futures::stream::pending()),
    )
}
