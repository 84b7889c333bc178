use crate::{LogKey, StorageError};
use alloy_primitives::B256;
use auto_impl::auto_impl;
use chainwatch_types::{Head, JobId, LogRecord};
use std::fmt::Debug;

/// Provides read access to persisted heads.
///
/// Implementations are expected to provide persistent and thread-safe access to head data.
#[auto_impl(&, Arc)]
pub trait HeadStorageReader: Debug {
    /// Retrieves a single head by its hash, without ancestors.
    fn head_by_hash(&self, hash: B256) -> Result<Option<Head>, StorageError>;

    /// Retrieves the head with the highest number.
    ///
    /// # Returns
    /// * `Ok(None)` if no head has been stored yet.
    fn latest_head(&self) -> Result<Option<Head>, StorageError>;

    /// Retrieves up to `limit` heads ordered by number, highest first.
    ///
    /// Competing heads at the same number are all returned.
    fn latest_heads(&self, limit: usize) -> Result<Vec<Head>, StorageError>;

    /// Rebuilds the chain ending at `hash`.
    ///
    /// # Arguments
    /// * `hash` - Hash of the newest head of the chain.
    /// * `lookback` - Maximum number of heads in the returned chain.
    ///
    /// # Returns
    /// * `Ok(Some(Head))` with parent links set for every stored ancestor, stopping at the first
    ///   missing one.
    /// * `Ok(None)` if `hash` is not stored.
    fn chain(&self, hash: B256, lookback: u64) -> Result<Option<Head>, StorageError>;
}

/// Provides write access to persisted heads.
#[auto_impl(&, Arc)]
pub trait HeadStorageWriter: Send + Sync + Debug {
    /// Stores `head` unless a head with the same hash is already present.
    ///
    /// # Returns
    /// * `Ok(true)` if the head was inserted, `Ok(false)` if it was already stored.
    fn insert_head(&self, head: &Head) -> Result<bool, StorageError>;

    /// Deletes heads numbered `depth` or more below the highest stored head.
    ///
    /// # Returns
    /// * `Ok(usize)` with the number of deleted heads.
    fn trim_old_heads(&self, depth: u64) -> Result<usize, StorageError>;
}

/// Combines both reading and writing capabilities for head storage.
///
/// Any type that implements both [`HeadStorageReader`] and [`HeadStorageWriter`] automatically
/// implements this trait.
pub trait HeadStorage: HeadStorageReader + HeadStorageWriter {}

impl<T: HeadStorageReader + HeadStorageWriter> HeadStorage for T {}

/// Provides read access to pending logs and their broadcast records.
#[auto_impl(&, Arc)]
pub trait LogStorageReader: Debug {
    /// Whether the listener of `job_id` already acknowledged `log`.
    fn was_broadcast_consumed(&self, log: LogKey, job_id: JobId) -> Result<bool, StorageError>;

    /// Retrieves the logs with a block number below `height` that some listener still has to
    /// acknowledge, ordered by `(block_number, log_index)`.
    ///
    /// A log without any broadcast record is considered pending.
    fn unconsumed_logs_prior_to_block(&self, height: u64)
    -> Result<Vec<LogRecord>, StorageError>;
}

/// Provides write access to pending logs and their broadcast records.
#[auto_impl(&, Arc)]
pub trait LogStorageWriter: Send + Sync + Debug {
    /// Stores `log`, replacing an identical entry.
    fn upsert_log(&self, log: &LogRecord) -> Result<(), StorageError>;

    /// Records that `log` is pending for the listener of `job_id`.
    ///
    /// An existing record, consumed or not, is left untouched.
    fn upsert_unconsumed_broadcast_for_listener(
        &self,
        log: LogKey,
        job_id: JobId,
    ) -> Result<(), StorageError>;

    /// Marks `log` as acknowledged by the listener of `job_id`.
    fn mark_broadcast_consumed(&self, log: LogKey, job_id: JobId) -> Result<(), StorageError>;

    /// Deletes `log` together with all of its broadcast records.
    fn delete_log_and_broadcasts(&self, log: LogKey) -> Result<(), StorageError>;

    /// Deletes logs and broadcast records below `block_number`.
    ///
    /// # Returns
    /// * `Ok(usize)` with the number of deleted logs.
    fn prune_logs_before(&self, block_number: u64) -> Result<usize, StorageError>;
}

/// Combines both reading and writing capabilities for log storage.
///
/// Any type that implements both [`LogStorageReader`] and [`LogStorageWriter`] automatically
/// implements this trait.
pub trait LogStorage: LogStorageReader + LogStorageWriter {}

impl<T: LogStorageReader + LogStorageWriter> LogStorage for T {}
