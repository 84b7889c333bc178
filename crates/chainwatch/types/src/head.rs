//! Locally tracked block headers and the parent-linked chain behind them.
//!
//! A [`Head`] optionally owns a link to its parent, forming a singly linked list back toward
//! genesis (or as far back as the tracker retains). Links are shared through [`Arc`] so that a
//! reconstructed chain can be handed to several consumers without copying it, and every link is
//! validated against the child's `parent_hash` so that cycles cannot be constructed.

use alloy_primitives::{B256, ChainId};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised when linking a parent into a [`Head`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeadError {
    /// The parent's hash does not match the child's parent hash.
    #[error("parent hash mismatch: expected {expected}, got {actual}")]
    ParentHashMismatch {
        /// Parent hash recorded in the child.
        expected: B256,
        /// Hash of the head offered as parent.
        actual: B256,
    },

    /// The parent is not exactly one block below the child.
    #[error("parent number mismatch: child {child}, parent {parent}")]
    ParentNumberMismatch {
        /// Number of the child head.
        child: u64,
        /// Number of the head offered as parent.
        parent: u64,
    },
}

/// A block header as known locally.
#[derive(Debug, Clone, Default, Display, Serialize, Deserialize)]
#[display("number: {number}, hash: {hash}")]
pub struct Head {
    /// Block number.
    pub number: u64,
    /// Block hash.
    pub hash: B256,
    /// Hash of the parent block.
    pub parent_hash: B256,
    /// Block timestamp.
    pub timestamp: u64,
    /// Chain id of the network the header was received from, if known.
    pub evm_chain_id: Option<ChainId>,
    #[serde(skip)]
    parent: Option<Arc<Head>>,
}

impl Head {
    /// Creates a head with no parent link and no chain id.
    pub const fn new(number: u64, hash: B256, parent_hash: B256, timestamp: u64) -> Self {
        Self { number, hash, parent_hash, timestamp, evm_chain_id: None, parent: None }
    }

    /// Stamps the head with the chain id it was received from.
    pub fn with_chain_id(mut self, chain_id: ChainId) -> Self {
        self.evm_chain_id = Some(chain_id);
        self
    }

    /// Returns the linked parent, if any.
    pub fn parent(&self) -> Option<&Self> {
        self.parent.as_deref()
    }

    /// Links `parent` below this head.
    ///
    /// The link is only created if `parent.hash == self.parent_hash` and the parent sits exactly
    /// one block below. Any existing link is replaced.
    pub fn set_parent(&mut self, parent: Self) -> Result<(), HeadError> {
        self.set_shared_parent(Arc::new(parent))
    }

    /// Same as [`Head::set_parent`] but reuses an already shared chain.
    pub fn set_shared_parent(&mut self, parent: Arc<Self>) -> Result<(), HeadError> {
        if parent.hash != self.parent_hash {
            return Err(HeadError::ParentHashMismatch {
                expected: self.parent_hash,
                actual: parent.hash,
            });
        }
        if parent.number.checked_add(1) != Some(self.number) {
            return Err(HeadError::ParentNumberMismatch {
                child: self.number,
                parent: parent.number,
            });
        }
        self.parent = Some(parent);
        Ok(())
    }

    /// Builder form of [`Head::set_parent`].
    pub fn with_parent(mut self, parent: Self) -> Result<Self, HeadError> {
        self.set_parent(parent)?;
        Ok(self)
    }

    /// Drops the parent link, returning it.
    pub fn take_parent(&mut self) -> Option<Arc<Self>> {
        self.parent.take()
    }

    /// Returns a copy of this header without its ancestors.
    pub fn detached(&self) -> Self {
        Self {
            number: self.number,
            hash: self.hash,
            parent_hash: self.parent_hash,
            timestamp: self.timestamp,
            evm_chain_id: self.evm_chain_id,
            parent: None,
        }
    }

    /// Iterates from this head toward the earliest linked ancestor.
    pub fn iter(&self) -> ChainIter<'_> {
        ChainIter { next: Some(self) }
    }

    /// Number of heads in the chain, this one included.
    pub fn chain_length(&self) -> u64 {
        self.iter().count() as u64
    }

    /// The earliest head reachable by following parent links.
    pub fn earliest_in_chain(&self) -> &Self {
        let mut earliest = self;
        while let Some(parent) = earliest.parent() {
            earliest = parent;
        }
        earliest
    }

    /// Whether a head with `hash` is part of this chain.
    pub fn is_in_chain(&self, hash: B256) -> bool {
        self.iter().any(|head| head.hash == hash)
    }

    /// Hash of the chain member at `number`, if the chain reaches that far back.
    pub fn hash_at_height(&self, number: u64) -> Option<B256> {
        self.iter().find(|head| head.number == number).map(|head| head.hash)
    }

    /// Whether the chain contains a head at `number`.
    pub fn covers_height(&self, number: u64) -> bool {
        number <= self.number && number >= self.earliest_in_chain().number
    }
}

/// Two heads are equal when they describe the same header, regardless of linked ancestors.
impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number &&
            self.hash == other.hash &&
            self.parent_hash == other.parent_hash &&
            self.timestamp == other.timestamp &&
            self.evm_chain_id == other.evm_chain_id
    }
}

impl Eq for Head {}

// Unlinks the chain iteratively so that long chains do not recurse on drop.
impl Drop for Head {
    fn drop(&mut self) {
        let mut next = self.parent.take();
        while let Some(parent) = next {
            match Arc::try_unwrap(parent) {
                Ok(mut head) => next = head.parent.take(),
                Err(_) => break,
            }
        }
    }
}

impl From<alloy_rpc_types_eth::Header> for Head {
    fn from(header: alloy_rpc_types_eth::Header) -> Self {
        Self::new(
            header.inner.number,
            header.hash,
            header.inner.parent_hash,
            header.inner.timestamp,
        )
    }
}

/// Iterator over a [`Head`] and its ancestors, newest first.
#[derive(Debug, Clone)]
pub struct ChainIter<'a> {
    next: Option<&'a Head>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a Head;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u8) -> B256 {
        B256::from([n; 32])
    }

    fn head(number: u64) -> Head {
        Head::new(number, hash(number as u8 + 1), hash(number as u8), 1_000 + number)
    }

    fn chain(upto: u64) -> Head {
        let mut current = head(0);
        for number in 1..=upto {
            current = head(number).with_parent(current).unwrap();
        }
        current
    }

    #[test]
    fn test_chain_length_and_earliest() {
        let single = head(7);
        assert_eq!(single.chain_length(), 1);
        assert_eq!(single.earliest_in_chain().number, 7);

        let linked = chain(3);
        assert_eq!(linked.chain_length(), 4);
        assert_eq!(linked.earliest_in_chain().number, 0);
        assert_eq!(linked.parent().unwrap().chain_length(), 3);
    }

    #[test]
    fn test_is_in_chain() {
        let linked = chain(3);
        assert!(linked.is_in_chain(head(0).hash));
        assert!(linked.is_in_chain(head(3).hash));
        assert!(!linked.is_in_chain(hash(99)));
    }

    #[test]
    fn test_hash_at_height() {
        let linked = chain(3);
        assert_eq!(linked.hash_at_height(2), Some(head(2).hash));
        assert_eq!(linked.hash_at_height(4), None);
        assert!(linked.covers_height(0));
        assert!(!linked.covers_height(4));
    }

    #[test]
    fn test_set_parent_rejects_wrong_hash() {
        let mut child = head(2);
        let err = child.set_parent(Head::new(1, hash(42), hash(1), 0)).unwrap_err();
        assert_eq!(err, HeadError::ParentHashMismatch { expected: hash(2), actual: hash(42) });
        assert!(child.parent().is_none());
    }

    #[test]
    fn test_set_parent_rejects_wrong_number() {
        let mut child = head(2);
        let err = child.set_parent(Head::new(0, hash(2), hash(0), 0)).unwrap_err();
        assert_eq!(err, HeadError::ParentNumberMismatch { child: 2, parent: 0 });
    }

    #[test]
    fn test_self_link_is_rejected() {
        let mut child = head(2);
        let same = child.clone();
        assert!(child.set_parent(same).is_err());
    }

    #[test]
    fn test_equality_ignores_parent() {
        let linked = chain(2);
        assert_eq!(linked, linked.detached());
        assert!(linked.detached().parent().is_none());
    }

    #[test]
    fn test_serde_skips_parent() {
        let linked = chain(1).with_chain_id(10);
        let json = serde_json::to_string(&linked).unwrap();
        let decoded: Head = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, linked);
        assert_eq!(decoded.chain_length(), 1);
        assert_eq!(decoded.evm_chain_id, Some(10));
    }

    #[test]
    fn test_dropping_long_chain() {
        let mut current = Head::new(0, B256::with_last_byte(0), B256::ZERO, 0);
        for number in 1..50_000u64 {
            let parent_hash = current.hash;
            let mut next = Head::new(
                number,
                B256::left_padding_from(&number.to_be_bytes()),
                parent_hash,
                number,
            );
            next.set_parent(current).unwrap();
            current = next;
        }
        assert_eq!(current.chain_length(), 50_000);
        drop(current);
    }
}
