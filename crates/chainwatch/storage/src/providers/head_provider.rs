//! Reth's MDBX-backed storage of tracked heads.
//!
//! Heads are stored in [`Heads`] keyed by hash, so inserting the same head twice is a no-op.
//! [`HeadNumbers`] is a dup-sorted index from block number to the hashes seen at that height and
//! is what makes "latest" queries and trimming cheap.

use crate::{
    error::StorageError,
    models::{HeadNumbers, Heads},
};
use alloy_primitives::B256;
use chainwatch_types::Head;
use reth_db_api::{
    cursor::DbCursorRO,
    transaction::{DbTx, DbTxMut},
};
use tracing::{debug, error};

/// A head storage that wraps a transactional reference to the MDBX backend.
#[derive(Debug)]
pub(crate) struct HeadProvider<'tx, TX> {
    tx: &'tx TX,
}

impl<'tx, TX> HeadProvider<'tx, TX> {
    pub(crate) const fn new(tx: &'tx TX) -> Self {
        Self { tx }
    }
}

impl<TX> HeadProvider<'_, TX>
where
    TX: DbTx,
{
    pub(crate) fn head_by_hash(&self, hash: B256) -> Result<Option<Head>, StorageError> {
        Ok(self.tx.get::<Heads>(hash)?.map(Into::into))
    }

    /// Returns the head with the highest number.
    pub(crate) fn latest_head(&self) -> Result<Option<Head>, StorageError> {
        let mut cursor = self.tx.cursor_read::<HeadNumbers>()?;
        match cursor.last()? {
            Some((_, hash)) => self.head_by_hash(hash),
            None => Ok(None),
        }
    }

    /// Returns up to `limit` heads, highest number first.
    pub(crate) fn latest_heads(&self, limit: usize) -> Result<Vec<Head>, StorageError> {
        let mut cursor = self.tx.cursor_read::<HeadNumbers>()?;
        let mut heads = Vec::with_capacity(limit.min(1024));

        for row in cursor.walk_back(None)?.take(limit) {
            let (number, hash) = row?;
            match self.head_by_hash(hash)? {
                Some(head) => heads.push(head),
                None => {
                    error!(
                        target: "chainwatch::storage",
                        number,
                        %hash,
                        "Head number index points at a missing head"
                    );
                }
            }
        }
        Ok(heads)
    }

    /// Rebuilds the chain ending at `hash`, following parent hashes for at most `lookback` heads.
    pub(crate) fn chain(&self, hash: B256, lookback: u64) -> Result<Option<Head>, StorageError> {
        let mut members = Vec::new();
        let mut next = Some(hash);

        while let Some(current) = next {
            if members.len() as u64 >= lookback {
                break;
            }
            match self.head_by_hash(current)? {
                Some(head) => {
                    next = Some(head.parent_hash);
                    members.push(head);
                }
                None => next = None,
            }
        }

        let Some(mut chain) = members.pop() else {
            return Ok(None);
        };
        while let Some(mut child) = members.pop() {
            child.set_parent(chain)?;
            chain = child;
        }
        Ok(Some(chain))
    }

    pub(crate) fn count_heads(&self) -> Result<usize, StorageError> {
        Ok(self.tx.entries::<Heads>()?)
    }
}

impl<TX> HeadProvider<'_, TX>
where
    TX: DbTxMut + DbTx,
{
    /// Inserts `head` unless a head with the same hash is already stored.
    ///
    /// Returns whether the head was inserted.
    pub(crate) fn insert_head(&self, head: &Head) -> Result<bool, StorageError> {
        if self.tx.get::<Heads>(head.hash)?.is_some() {
            return Ok(false);
        }

        self.tx.put::<Heads>(head.hash, head.into()).inspect_err(|err| {
            error!(
                target: "chainwatch::storage",
                number = head.number,
                hash = %head.hash,
                %err,
                "Failed to insert head"
            );
        })?;
        self.tx.put::<HeadNumbers>(head.number, head.hash)?;
        Ok(true)
    }

    /// Deletes every head numbered `depth` or more below the highest stored head.
    ///
    /// Forks share heights, so the rows kept can outnumber `depth`. Returns the number of deleted
    /// heads.
    pub(crate) fn trim_old_heads(&self, depth: u64) -> Result<usize, StorageError> {
        if depth == 0 {
            return Ok(0);
        }

        let mut cursor = self.tx.cursor_read::<HeadNumbers>()?;
        let Some((highest, _)) = cursor.last()? else {
            return Ok(0);
        };
        let cutoff = (highest + 1).saturating_sub(depth);
        if cutoff == 0 {
            return Ok(0);
        }

        let mut stale = Vec::new();
        for row in cursor.walk_range(..cutoff)? {
            stale.push(row?);
        }

        for (number, hash) in &stale {
            self.tx.delete::<HeadNumbers>(*number, Some(*hash))?;
            self.tx.delete::<Heads>(*hash, None)?;
        }

        if !stale.is_empty() {
            debug!(
                target: "chainwatch::storage",
                cutoff,
                deleted = stale.len(),
                "Trimmed old heads"
            );
        }
        Ok(stale.len())
    }
}
