use crate::ConfigError;
use alloy_primitives::Address;
use chainwatch_storage::StorageError;
use chainwatch_types::JobId;
use thiserror::Error;

/// Errors raised by the log broadcaster.
#[derive(Debug, Error)]
pub enum LogBroadcasterError {
    /// The listener of this job already watches this contract.
    #[error("job {job_id} is already registered for contract {address}")]
    AlreadyRegistered {
        /// Watched contract.
        address: Address,
        /// Job owning the listener.
        job_id: JobId,
    },

    /// Accessing the log storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// [`LogBroadcaster::run`](super::LogBroadcaster::run) was called twice.
    #[error("log broadcaster is already running")]
    AlreadyStarted,

    /// The log relayer is gone, so registrations can no longer be applied.
    #[error("log broadcaster stopped")]
    Stopped,

    /// The configuration is inconsistent.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised while decoding a raw log into a typed event.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The log does not match the event's ABI.
    #[error(transparent)]
    Abi(#[from] alloy_sol_types::Error),

    /// The log carries no event id.
    #[error("log has no topics")]
    MissingTopic,
}
