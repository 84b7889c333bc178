//! Models for logs waiting for delivery and their per-listener broadcast records.
//!
//! A pending log is identified by a [`LogKey`]: block number first, so that range scans return
//! logs in ascending `(block_number, log_index)` order, then block hash, so that logs of competing
//! blocks at the same height are kept apart.

use alloy_primitives::{Address, B256, Bytes};
use bytes::{Buf, BufMut};
use chainwatch_types::{JobId, LogRecord};
use reth_codecs::Compact;
use reth_db_api::{
    DatabaseError,
    table::{Decode, Encode},
};
use serde::{Deserialize, Serialize};

const LOG_KEY_LEN: usize = 8 + 32 + 8;
const BROADCAST_KEY_LEN: usize = LOG_KEY_LEN + 8;

/// Identity of a pending log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogKey {
    /// Number of the including block.
    pub block_number: u64,
    /// Hash of the including block.
    pub block_hash: B256,
    /// Index of the log within the block.
    pub log_index: u64,
}

impl LogKey {
    /// Creates a new key.
    pub const fn new(block_number: u64, block_hash: B256, log_index: u64) -> Self {
        Self { block_number, block_hash, log_index }
    }

    /// The smallest key at `block_number`, used as a range bound.
    pub const fn lowest_at(block_number: u64) -> Self {
        Self::new(block_number, B256::ZERO, 0)
    }

    fn write_to(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.block_number.to_be_bytes());
        buf[8..40].copy_from_slice(self.block_hash.as_slice());
        buf[40..48].copy_from_slice(&self.log_index.to_be_bytes());
    }

    fn read_from(value: &[u8]) -> Result<Self, DatabaseError> {
        if value.len() < LOG_KEY_LEN {
            return Err(DatabaseError::Decode);
        }
        let block_number =
            u64::from_be_bytes(value[..8].try_into().map_err(|_| DatabaseError::Decode)?);
        let block_hash = B256::from_slice(&value[8..40]);
        let log_index =
            u64::from_be_bytes(value[40..48].try_into().map_err(|_| DatabaseError::Decode)?);
        Ok(Self { block_number, block_hash, log_index })
    }
}

impl From<&LogRecord> for LogKey {
    fn from(log: &LogRecord) -> Self {
        Self::new(log.block_number, log.block_hash, log.log_index)
    }
}

impl Encode for LogKey {
    type Encoded = [u8; LOG_KEY_LEN];

    fn encode(self) -> Self::Encoded {
        let mut buf = [0u8; LOG_KEY_LEN];
        self.write_to(&mut buf);
        buf
    }
}

impl Decode for LogKey {
    fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
        if value.len() != LOG_KEY_LEN {
            return Err(DatabaseError::Decode);
        }
        Self::read_from(value)
    }
}

/// Identity of a broadcast of one pending log to one listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BroadcastKey {
    /// The broadcast log.
    pub log: LogKey,
    /// Job owning the listener.
    pub job_id: JobId,
}

impl BroadcastKey {
    /// Creates a new key.
    pub const fn new(log: LogKey, job_id: JobId) -> Self {
        Self { log, job_id }
    }
}

impl Encode for BroadcastKey {
    type Encoded = [u8; BROADCAST_KEY_LEN];

    fn encode(self) -> Self::Encoded {
        let mut buf = [0u8; BROADCAST_KEY_LEN];
        self.log.write_to(&mut buf);
        buf[LOG_KEY_LEN..].copy_from_slice(&self.job_id.to_be_bytes());
        buf
    }
}

impl Decode for BroadcastKey {
    fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
        if value.len() != BROADCAST_KEY_LEN {
            return Err(DatabaseError::Decode);
        }
        let log = LogKey::read_from(value)?;
        let job_id = u64::from_be_bytes(
            value[LOG_KEY_LEN..].try_into().map_err(|_| DatabaseError::Decode)?,
        );
        Ok(Self { log, job_id })
    }
}

/// Body of a pending log. Block placement lives in the [`LogKey`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogEntry {
    /// Emitting contract.
    pub address: Address,
    /// Indexed topics.
    pub topics: Vec<B256>,
    /// Non-indexed data.
    pub data: Bytes,
    /// Hash of the emitting transaction.
    pub tx_hash: B256,
}

impl LogEntry {
    /// Rebuilds the full log from its key.
    pub fn into_record(self, key: LogKey) -> LogRecord {
        LogRecord {
            address: self.address,
            topics: self.topics,
            data: self.data,
            block_hash: key.block_hash,
            block_number: key.block_number,
            tx_hash: self.tx_hash,
            log_index: key.log_index,
            removed: false,
        }
    }
}

impl From<&LogRecord> for LogEntry {
    fn from(log: &LogRecord) -> Self {
        Self {
            address: log.address,
            topics: log.topics.clone(),
            data: log.data.clone(),
            tx_hash: log.tx_hash,
        }
    }
}

/// ## Encoding Layout (ordered):
/// - `address: Address`
/// - `tx_hash: B256`
/// - `topic_count: u8`, followed by each 32-byte topic
/// - `data_len: u32`, followed by the data bytes
impl Compact for LogEntry {
    fn to_compact<B>(&self, buf: &mut B) -> usize
    where
        B: BufMut + AsMut<[u8]>,
    {
        let start_len = buf.remaining_mut();

        buf.put_slice(self.address.as_slice());
        buf.put_slice(self.tx_hash.as_slice());
        buf.put_u8(self.topics.len() as u8);
        for topic in &self.topics {
            buf.put_slice(topic.as_slice());
        }
        buf.put_u32(self.data.len() as u32);
        buf.put_slice(&self.data);

        start_len - buf.remaining_mut()
    }

    fn from_compact(mut buf: &[u8], _len: usize) -> (Self, &[u8]) {
        assert!(buf.len() >= 53, "LogEntry::from_compact: buffer too small for header");
        let address = Address::from_slice(&buf[..20]);
        let tx_hash = B256::from_slice(&buf[20..52]);
        buf.advance(52);

        let topic_count = buf.get_u8() as usize;
        assert!(buf.len() >= topic_count * 32, "LogEntry::from_compact: buffer too small for topics");
        let topics = buf[..topic_count * 32].chunks_exact(32).map(B256::from_slice).collect();
        buf.advance(topic_count * 32);

        let data_len = buf.get_u32() as usize;
        assert!(buf.len() >= data_len, "LogEntry::from_compact: buffer too small for data");
        let data = Bytes::copy_from_slice(&buf[..data_len]);
        buf.advance(data_len);

        (Self { address, topics, data, tx_hash }, buf)
    }
}

/// Acknowledgement state of a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BroadcastEntry {
    /// Set once the listener marked the log consumed.
    pub consumed: bool,
}

impl Compact for BroadcastEntry {
    fn to_compact<B>(&self, buf: &mut B) -> usize
    where
        B: BufMut + AsMut<[u8]>,
    {
        buf.put_u8(self.consumed as u8);
        1
    }

    fn from_compact(mut buf: &[u8], _len: usize) -> (Self, &[u8]) {
        let consumed = buf.get_u8() != 0;
        (Self { consumed }, buf)
    }
}
