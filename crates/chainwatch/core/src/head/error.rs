use crate::{ClientError, ConfigError};
use alloy_primitives::{B256, ChainId};
use chainwatch_storage::StorageError;
use thiserror::Error;

/// Errors that stop the head listener.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeadListenerError {
    /// The remote node serves another chain than the configured one.
    #[error("received head for chain {actual:?}, expected chain {expected}")]
    ChainIdMismatch {
        /// Configured chain id.
        expected: ChainId,
        /// Chain id stamped on the received head.
        actual: Option<ChainId>,
    },
}

/// Errors raised while fetching missing ancestors.
#[derive(Debug, Error)]
pub enum BackfillError {
    /// Fetching an ancestor failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Persisting an ancestor failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The fetched ancestor is not the parent of the chain being extended, the remote chain
    /// reorganised while backfilling.
    #[error("fetched head {number} has hash {actual}, expected {expected}")]
    HashMismatch {
        /// Number of the fetched head.
        number: u64,
        /// Parent hash recorded in the child.
        expected: B256,
        /// Hash of the fetched head.
        actual: B256,
    },
}

/// Errors raised by the head tracker.
#[derive(Debug, Error)]
pub enum HeadTrackerError {
    /// The configuration is inconsistent.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Accessing the head storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Talking to the remote node failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The head listener stopped on an unrecoverable error.
    #[error(transparent)]
    Listener(#[from] HeadListenerError),

    /// A head that was just saved cannot be found in memory.
    #[error("chain of head {number} ({hash}) cannot be reconstructed")]
    ChainNotReconstructable {
        /// Number of the head.
        number: u64,
        /// Hash of the head.
        hash: B256,
    },

    /// No head arrived within the idle threshold.
    #[error("not receiving heads")]
    NotReceivingHeads,

    /// The head subscription is down.
    #[error("not connected to the remote node")]
    NotConnected,
}
