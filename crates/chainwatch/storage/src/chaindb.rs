//! Main database access structure and transaction contexts.

use crate::{
    LogKey, Metrics,
    error::StorageError,
    providers::{HeadProvider, LogProvider},
    traits::{HeadStorageReader, HeadStorageWriter, LogStorageReader, LogStorageWriter},
};
use alloy_primitives::{B256, ChainId};
use chainwatch_metrics::{MetricsReporter, observe_metrics_for_result};
use chainwatch_types::{Head, JobId, LogRecord};
use metrics::gauge;
use reth_db::{
    DatabaseEnv,
    mdbx::{DatabaseArguments, init_db_for},
};
use reth_db_api::database::Database;
use std::path::Path;
use tracing::{info, warn};

/// Manages the database environment of one tracked chain.
/// Provides transactional access to data via providers.
#[derive(Debug)]
pub struct ChainDb {
    chain_id: ChainId,
    metrics_enabled: bool,

    env: DatabaseEnv,
}

impl ChainDb {
    /// Creates or opens a database environment at the given path.
    pub fn new(chain_id: ChainId, path: &Path) -> Result<Self, StorageError> {
        let env = init_db_for::<_, crate::models::Tables>(path, DatabaseArguments::default())?;
        info!(target: "chainwatch::storage", chain_id, path = %path.display(), "Opened database");
        Ok(Self { chain_id, metrics_enabled: false, env })
    }

    /// Enables metrics on the database environment.
    pub fn with_metrics(mut self) -> Self {
        self.metrics_enabled = true;
        Metrics::init(self.chain_id);
        self
    }

    fn observe_call<T, E, F: FnOnce() -> Result<T, E>>(
        &self,
        name: &'static str,
        f: F,
    ) -> Result<T, E> {
        if self.metrics_enabled {
            observe_metrics_for_result!(
                Metrics::STORAGE_REQUESTS_SUCCESS_TOTAL,
                Metrics::STORAGE_REQUESTS_ERROR_TOTAL,
                Metrics::STORAGE_REQUEST_DURATION_SECONDS,
                name,
                f(),
                "chain_id" => self.chain_id.to_string()
            )
        } else {
            f()
        }
    }
}

impl HeadStorageReader for ChainDb {
    fn head_by_hash(&self, hash: B256) -> Result<Option<Head>, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_HEAD_BY_HASH, || {
            self.env.view(|tx| HeadProvider::new(tx).head_by_hash(hash))
        })?
    }

    fn latest_head(&self) -> Result<Option<Head>, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_LATEST_HEAD, || {
            self.env.view(|tx| HeadProvider::new(tx).latest_head())
        })?
    }

    fn latest_heads(&self, limit: usize) -> Result<Vec<Head>, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_LATEST_HEADS, || {
            self.env.view(|tx| HeadProvider::new(tx).latest_heads(limit))
        })?
    }

    fn chain(&self, hash: B256, lookback: u64) -> Result<Option<Head>, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_CHAIN, || {
            self.env.view(|tx| HeadProvider::new(tx).chain(hash, lookback))
        })?
    }
}

impl HeadStorageWriter for ChainDb {
    fn insert_head(&self, head: &Head) -> Result<bool, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_INSERT_HEAD, || {
            self.env.update(|tx| HeadProvider::new(tx).insert_head(head))
        })?
    }

    fn trim_old_heads(&self, depth: u64) -> Result<usize, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_TRIM_OLD_HEADS, || {
            self.env.update(|tx| HeadProvider::new(tx).trim_old_heads(depth))
        })?
    }
}

impl LogStorageReader for ChainDb {
    fn was_broadcast_consumed(&self, log: LogKey, job_id: JobId) -> Result<bool, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_WAS_BROADCAST_CONSUMED, || {
            self.env.view(|tx| LogProvider::new(tx).was_broadcast_consumed(log, job_id))
        })?
    }

    fn unconsumed_logs_prior_to_block(
        &self,
        height: u64,
    ) -> Result<Vec<LogRecord>, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_UNCONSUMED_LOGS_PRIOR_TO_BLOCK, || {
            self.env.view(|tx| LogProvider::new(tx).unconsumed_logs_prior_to_block(height))
        })?
    }
}

impl LogStorageWriter for ChainDb {
    fn upsert_log(&self, log: &LogRecord) -> Result<(), StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_UPSERT_LOG, || {
            self.env.update(|tx| LogProvider::new(tx).upsert_log(log))
        })?
    }

    fn upsert_unconsumed_broadcast_for_listener(
        &self,
        log: LogKey,
        job_id: JobId,
    ) -> Result<(), StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_UPSERT_UNCONSUMED_BROADCAST, || {
            self.env.update(|tx| LogProvider::new(tx).upsert_unconsumed_broadcast(log, job_id))
        })?
    }

    fn mark_broadcast_consumed(&self, log: LogKey, job_id: JobId) -> Result<(), StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_MARK_BROADCAST_CONSUMED, || {
            self.env.update(|tx| LogProvider::new(tx).mark_broadcast_consumed(log, job_id))
        })?
    }

    fn delete_log_and_broadcasts(&self, log: LogKey) -> Result<(), StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_DELETE_LOG_AND_BROADCASTS, || {
            self.env.update(|tx| LogProvider::new(tx).delete_log_and_broadcasts(log))
        })?
    }

    fn prune_logs_before(&self, block_number: u64) -> Result<usize, StorageError> {
        self.observe_call(Metrics::STORAGE_METHOD_PRUNE_LOGS_BEFORE, || {
            self.env.update(|tx| LogProvider::new(tx).prune_logs_before(block_number))
        })?
    }
}

impl MetricsReporter for ChainDb {
    fn report_metrics(&self) {
        let counts = self
            .env
            .view(|tx| -> Result<(usize, usize), StorageError> {
                Ok((HeadProvider::new(tx).count_heads()?, LogProvider::new(tx).count_logs()?))
            })
            .map_err(StorageError::from)
            .and_then(|counts| counts);

        match counts {
            Ok((heads, logs)) => {
                let chain_id = self.chain_id.to_string();
                gauge!(Metrics::STORAGE_STORED_HEADS, "chain_id" => chain_id.clone())
                    .set(heads as f64);
                gauge!(Metrics::STORAGE_PENDING_LOGS, "chain_id" => chain_id).set(logs as f64);
            }
            Err(err) => {
                warn!(target: "chainwatch::storage", %err, "Failed to collect database metrics");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes};
    use tempfile::TempDir;

    fn sample_log(block_number: u64, log_index: u64) -> LogRecord {
        LogRecord {
            address: Address::repeat_byte(1),
            topics: vec![B256::repeat_byte(2)],
            data: Bytes::new(),
            block_hash: B256::repeat_byte(block_number as u8),
            block_number,
            tx_hash: B256::ZERO,
            log_index,
            removed: false,
        }
    }

    #[test]
    fn test_create_and_open_db() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let db_path = tmp_dir.path().join("chaindb");
        let db = ChainDb::new(1, &db_path);
        assert!(db.is_ok(), "Should create or open database");
    }

    #[test]
    fn test_head_storage() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let db = ChainDb::new(1, &tmp_dir.path().join("heads")).expect("create db").with_metrics();

        let genesis = Head::new(0, B256::repeat_byte(1), B256::ZERO, 0);
        let child = Head::new(1, B256::repeat_byte(2), genesis.hash, 12);

        assert!(db.insert_head(&genesis).unwrap());
        assert!(db.insert_head(&child).unwrap());
        assert!(!db.insert_head(&child).unwrap());

        assert_eq!(db.latest_head().unwrap(), Some(child.clone()));
        assert_eq!(db.head_by_hash(genesis.hash).unwrap(), Some(genesis.clone()));
        let chain = db.chain(child.hash, 10).unwrap().expect("chain");
        assert_eq!(chain.chain_length(), 2);

        assert_eq!(db.trim_old_heads(1).unwrap(), 1);
        assert_eq!(db.head_by_hash(genesis.hash).unwrap(), None);

        db.report_metrics();
    }

    #[test]
    fn test_log_storage() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let db = ChainDb::new(1, &tmp_dir.path().join("logs")).expect("create db");

        let first = sample_log(10, 0);
        let second = sample_log(11, 0);
        for log in [&first, &second] {
            db.upsert_log(log).unwrap();
            db.upsert_unconsumed_broadcast_for_listener(log.into(), 1).unwrap();
        }

        assert_eq!(db.unconsumed_logs_prior_to_block(11).unwrap(), vec![first.clone()]);

        db.mark_broadcast_consumed((&first).into(), 1).unwrap();
        assert!(db.was_broadcast_consumed((&first).into(), 1).unwrap());
        assert!(db.unconsumed_logs_prior_to_block(11).unwrap().is_empty());

        db.delete_log_and_broadcasts((&second).into()).unwrap();
        assert!(db.unconsumed_logs_prior_to_block(100).unwrap().is_empty());

        assert_eq!(db.prune_logs_before(100).unwrap(), 1);
    }

    #[test]
    fn test_reopen_keeps_heads() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let path = tmp_dir.path().join("reopen");
        let head = Head::new(5, B256::repeat_byte(5), B256::repeat_byte(4), 50).with_chain_id(1);
        {
            let db = ChainDb::new(1, &path).expect("create db");
            db.insert_head(&head).unwrap();
        }
        let db = ChainDb::new(1, &path).expect("reopen db");
        assert_eq!(db.latest_head().unwrap(), Some(head));
    }
}
