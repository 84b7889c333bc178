use super::DecodeError;
use alloy_sol_types::SolEvent;
use chainwatch_storage::{LogKey, LogStorage, StorageError};
use chainwatch_types::{JobId, LogRecord};
use std::{fmt, sync::Arc};

/// A log handed to one listener, with access to that listener's consumption record.
///
/// Every listener receives its own copy of the log.
#[derive(Clone)]
pub struct Broadcast {
    log: LogRecord,
    job_id: JobId,
    db: Arc<dyn LogStorage>,
}

impl Broadcast {
    /// Wraps `log` for the listener of `job_id`.
    pub fn new(log: LogRecord, job_id: JobId, db: Arc<dyn LogStorage>) -> Self {
        Self { log, job_id, db }
    }

    /// The raw log.
    pub const fn raw_log(&self) -> &LogRecord {
        &self.log
    }

    /// Decodes the log as event `E`.
    pub fn decode<E: SolEvent>(&self) -> Result<E, DecodeError> {
        if self.log.topics.is_empty() {
            return Err(DecodeError::MissingTopic);
        }
        Ok(E::decode_raw_log(self.log.topics.iter().copied(), &self.log.data)?)
    }

    /// Job of the listener the log is handed to.
    pub const fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Storage key of the log.
    pub fn log_key(&self) -> LogKey {
        LogKey::from(&self.log)
    }

    /// Whether the listener already marked this log as consumed.
    pub fn was_already_consumed(&self) -> Result<bool, StorageError> {
        self.db.was_broadcast_consumed(self.log_key(), self.job_id)
    }

    /// Records that the listener handled this log, so it is not handed over again.
    pub fn mark_consumed(&self) -> Result<(), StorageError> {
        self.db.mark_broadcast_consumed(self.log_key(), self.job_id)
    }
}

impl fmt::Debug for Broadcast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcast")
            .field("log", &self.log)
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}
