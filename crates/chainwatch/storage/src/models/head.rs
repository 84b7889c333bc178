//! Stored form of a tracked head.

use alloy_primitives::{B256, ChainId};
use bytes::{Buf, BufMut};
use chainwatch_types::Head;
use reth_codecs::Compact;
use serde::{Deserialize, Serialize};

/// A head as stored in the [`crate::models::Heads`] table.
///
/// Parent links are not stored, chains are rebuilt by following `parent_hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeadEntry {
    /// Block number.
    pub number: u64,
    /// Block hash.
    pub hash: B256,
    /// Parent block hash.
    pub parent_hash: B256,
    /// Block timestamp.
    pub timestamp: u64,
    /// Chain id the head was received from.
    pub evm_chain_id: Option<ChainId>,
}

/// ## Encoding Layout (ordered):
/// - `number: u64`
/// - `hash: B256`
/// - `parent_hash: B256`
/// - `timestamp: u64`
/// - `has_chain_id: u8` – 1 if `evm_chain_id` is present, 0 otherwise.
/// - `evm_chain_id: u64` – only if present.
impl Compact for HeadEntry {
    fn to_compact<B>(&self, buf: &mut B) -> usize
    where
        B: BufMut + AsMut<[u8]>,
    {
        let start_len = buf.remaining_mut();

        buf.put_u64(self.number);
        buf.put_slice(self.hash.as_slice());
        buf.put_slice(self.parent_hash.as_slice());
        buf.put_u64(self.timestamp);
        buf.put_u8(self.evm_chain_id.is_some() as u8);
        if let Some(chain_id) = self.evm_chain_id {
            buf.put_u64(chain_id);
        }

        start_len - buf.remaining_mut()
    }

    fn from_compact(mut buf: &[u8], _len: usize) -> (Self, &[u8]) {
        let number = buf.get_u64();

        assert!(buf.len() >= 64, "HeadEntry::from_compact: buffer too small for hashes");
        let hash = B256::from_slice(&buf[..32]);
        let parent_hash = B256::from_slice(&buf[32..64]);
        buf.advance(64);

        let timestamp = buf.get_u64();
        let evm_chain_id = (buf.get_u8() != 0).then(|| buf.get_u64());

        (Self { number, hash, parent_hash, timestamp, evm_chain_id }, buf)
    }
}

impl From<&Head> for HeadEntry {
    fn from(head: &Head) -> Self {
        Self {
            number: head.number,
            hash: head.hash,
            parent_hash: head.parent_hash,
            timestamp: head.timestamp,
            evm_chain_id: head.evm_chain_id,
        }
    }
}

impl From<HeadEntry> for Head {
    fn from(entry: HeadEntry) -> Self {
        let head = Self::new(entry.number, entry.hash, entry.parent_hash, entry.timestamp);
        match entry.evm_chain_id {
            Some(chain_id) => head.with_chain_id(chain_id),
            None => head,
        }
    }
}
