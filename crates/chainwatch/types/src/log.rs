//! Raw event logs as delivered to log listeners.

use alloy_primitives::{Address, B256, Bytes};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of the job owning a log listener.
pub type JobId = u64;

/// A raw event log observed on chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[display("address: {address}, block: {block_number}, index: {log_index}")]
pub struct LogRecord {
    /// Emitting contract.
    pub address: Address,
    /// Indexed topics, the event id first.
    pub topics: Vec<B256>,
    /// Non-indexed data.
    pub data: Bytes,
    /// Hash of the including block.
    pub block_hash: B256,
    /// Number of the including block.
    pub block_number: u64,
    /// Hash of the emitting transaction.
    pub tx_hash: B256,
    /// Index of the log within the block.
    pub log_index: u64,
    /// Set when the log was invalidated by a reorg.
    pub removed: bool,
}

impl LogRecord {
    /// The event id (first topic), if the log has one.
    pub fn event_id(&self) -> Option<B256> {
        self.topics.first().copied()
    }

    /// Whether both logs identify the same emitted event, ignoring the `removed` flag.
    pub fn same_event(&self, other: &Self) -> bool {
        self.block_hash == other.block_hash && self.log_index == other.log_index
    }
}

/// Errors raised while converting an RPC log into a [`LogRecord`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LogConversionError {
    /// The log has not been included in a block yet.
    #[error("log is missing field `{0}`")]
    MissingField(&'static str),
}

impl TryFrom<alloy_rpc_types_eth::Log> for LogRecord {
    type Error = LogConversionError;

    fn try_from(log: alloy_rpc_types_eth::Log) -> Result<Self, Self::Error> {
        let block_hash = log.block_hash.ok_or(LogConversionError::MissingField("block_hash"))?;
        let block_number =
            log.block_number.ok_or(LogConversionError::MissingField("block_number"))?;
        let log_index = log.log_index.ok_or(LogConversionError::MissingField("log_index"))?;

        Ok(Self {
            address: log.inner.address,
            topics: log.inner.data.topics().to_vec(),
            data: log.inner.data.data.clone(),
            block_hash,
            block_number,
            tx_hash: log.transaction_hash.unwrap_or_default(),
            log_index,
            removed: log.removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{LogData, address, b256, bytes};

    fn rpc_log() -> alloy_rpc_types_eth::Log {
        alloy_rpc_types_eth::Log {
            inner: alloy_primitives::Log {
                address: address!("0x00000000000000000000000000000000000000aa"),
                data: LogData::new_unchecked(
                    vec![b256!(
                        "0x1111111111111111111111111111111111111111111111111111111111111111"
                    )],
                    bytes!("0xdeadbeef"),
                ),
            },
            block_hash: Some(B256::repeat_byte(0x22)),
            block_number: Some(42),
            block_timestamp: None,
            transaction_hash: Some(B256::repeat_byte(0x33)),
            transaction_index: Some(0),
            log_index: Some(7),
            removed: false,
        }
    }

    #[test]
    fn test_try_from_rpc_log() {
        let record = LogRecord::try_from(rpc_log()).unwrap();
        assert_eq!(record.address, address!("0x00000000000000000000000000000000000000aa"));
        assert_eq!(record.block_number, 42);
        assert_eq!(record.log_index, 7);
        assert_eq!(record.block_hash, B256::repeat_byte(0x22));
        assert_eq!(record.data, bytes!("0xdeadbeef"));
        assert_eq!(
            record.event_id(),
            Some(b256!("0x1111111111111111111111111111111111111111111111111111111111111111"))
        );
    }

    #[test]
    fn test_try_from_pending_log_fails() {
        let mut log = rpc_log();
        log.block_hash = None;
        assert_eq!(
            LogRecord::try_from(log).unwrap_err(),
            LogConversionError::MissingField("block_hash")
        );
    }

    #[test]
    fn test_same_event_ignores_removed() {
        let record = LogRecord::try_from(rpc_log()).unwrap();
        let removed = LogRecord { removed: true, ..record.clone() };
        assert!(record.same_event(&removed));
        assert_ne!(record, removed);
    }
}
