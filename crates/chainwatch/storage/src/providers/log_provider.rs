//! Reth's MDBX-backed storage of pending logs and their broadcast records.
//!
//! A log stays in [`Logs`] until it is removed by a reorg or pruned below finality. Every
//! listener the log was offered to gets a record in [`LogBroadcasts`], flipped to consumed once
//! the listener acknowledges it. A log is pending while it has no broadcast record at all or at
//! least one record that has not been consumed.

use crate::{
    error::StorageError,
    models::{BroadcastEntry, BroadcastKey, LogBroadcasts, LogKey, Logs},
};
use chainwatch_types::{JobId, LogRecord};
use reth_db_api::{
    cursor::{DbCursorRO, DbCursorRW},
    transaction::{DbTx, DbTxMut},
};
use tracing::{debug, error, trace};

/// A log storage that wraps a transactional reference to the MDBX backend.
#[derive(Debug)]
pub(crate) struct LogProvider<'tx, TX> {
    tx: &'tx TX,
}

impl<'tx, TX> LogProvider<'tx, TX> {
    pub(crate) const fn new(tx: &'tx TX) -> Self {
        Self { tx }
    }
}

fn broadcasts_of(log: LogKey) -> std::ops::RangeInclusive<BroadcastKey> {
    BroadcastKey::new(log, JobId::MIN)..=BroadcastKey::new(log, JobId::MAX)
}

impl<TX> LogProvider<'_, TX>
where
    TX: DbTx,
{
    pub(crate) fn was_broadcast_consumed(
        &self,
        log: LogKey,
        job_id: JobId,
    ) -> Result<bool, StorageError> {
        Ok(self
            .tx
            .get::<LogBroadcasts>(BroadcastKey::new(log, job_id))?
            .is_some_and(|entry| entry.consumed))
    }

    /// Returns pending logs with a block number below `height`, in `(block_number, log_index)`
    /// order.
    pub(crate) fn unconsumed_logs_prior_to_block(
        &self,
        height: u64,
    ) -> Result<Vec<LogRecord>, StorageError> {
        let mut logs = self.tx.cursor_read::<Logs>()?;
        let mut broadcasts = self.tx.cursor_read::<LogBroadcasts>()?;
        let mut pending = Vec::new();

        for row in logs.walk_range(..LogKey::lowest_at(height))? {
            let (key, entry) = row?;

            let mut seen = false;
            let mut unconsumed = false;
            for row in broadcasts.walk_range(broadcasts_of(key))? {
                let (_, broadcast) = row?;
                seen = true;
                if !broadcast.consumed {
                    unconsumed = true;
                    break;
                }
            }

            if !seen || unconsumed {
                pending.push(entry.into_record(key));
            }
        }

        trace!(
            target: "chainwatch::storage",
            height,
            pending = pending.len(),
            "Loaded unconsumed logs"
        );
        Ok(pending)
    }

    pub(crate) fn count_logs(&self) -> Result<usize, StorageError> {
        Ok(self.tx.entries::<Logs>()?)
    }
}

impl<TX> LogProvider<'_, TX>
where
    TX: DbTxMut + DbTx,
{
    pub(crate) fn upsert_log(&self, log: &LogRecord) -> Result<(), StorageError> {
        self.tx.put::<Logs>(LogKey::from(log), log.into()).inspect_err(|err| {
            error!(
                target: "chainwatch::storage",
                block_number = log.block_number,
                log_index = log.log_index,
                %err,
                "Failed to store log"
            );
        })?;
        Ok(())
    }

    /// Records that `log` is pending for `job_id`, keeping an existing record untouched.
    pub(crate) fn upsert_unconsumed_broadcast(
        &self,
        log: LogKey,
        job_id: JobId,
    ) -> Result<(), StorageError> {
        let key = BroadcastKey::new(log, job_id);
        if self.tx.get::<LogBroadcasts>(key)?.is_none() {
            self.tx.put::<LogBroadcasts>(key, BroadcastEntry { consumed: false })?;
        }
        Ok(())
    }

    pub(crate) fn mark_broadcast_consumed(
        &self,
        log: LogKey,
        job_id: JobId,
    ) -> Result<(), StorageError> {
        self.tx.put::<LogBroadcasts>(BroadcastKey::new(log, job_id), BroadcastEntry {
            consumed: true,
        })?;
        Ok(())
    }

    /// Deletes the log and every broadcast record of it.
    pub(crate) fn delete_log_and_broadcasts(&self, log: LogKey) -> Result<(), StorageError> {
        self.tx.delete::<Logs>(log, None)?;

        let mut cursor = self.tx.cursor_write::<LogBroadcasts>()?;
        let mut walker = cursor.walk_range(broadcasts_of(log))?;
        while let Some(row) = walker.next() {
            row?;
            walker.delete_current()?;
        }

        debug!(
            target: "chainwatch::storage",
            block_number = log.block_number,
            block_hash = %log.block_hash,
            log_index = log.log_index,
            "Deleted log and broadcasts"
        );
        Ok(())
    }

    /// Deletes logs and broadcast records with a block number below `block_number`.
    ///
    /// Returns the number of deleted logs.
    pub(crate) fn prune_logs_before(&self, block_number: u64) -> Result<usize, StorageError> {
        let bound = LogKey::lowest_at(block_number);

        let mut pruned = 0;
        let mut cursor = self.tx.cursor_write::<Logs>()?;
        let mut walker = cursor.walk_range(..bound)?;
        while let Some(row) = walker.next() {
            row?;
            walker.delete_current()?;
            pruned += 1;
        }

        let mut cursor = self.tx.cursor_write::<LogBroadcasts>()?;
        let mut walker = cursor.walk_range(..BroadcastKey::new(bound, JobId::MIN))?;
        while let Some(row) = walker.next() {
            row?;
            walker.delete_current()?;
        }

        if pruned > 0 {
            debug!(target: "chainwatch::storage", block_number, pruned, "Pruned old logs");
        }
        Ok(pruned)
    }
}
