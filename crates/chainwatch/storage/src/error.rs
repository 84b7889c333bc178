use chainwatch_types::HeadError;
use reth_db::DatabaseError;
use thiserror::Error;

/// Errors that may occur while interacting with chainwatch storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Represents a database error that occurred while interacting with storage.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Represents an error that occurred while initializing the database.
    #[error(transparent)]
    DatabaseInit(#[from] eyre::Report),

    /// Stored heads do not link into a valid chain.
    #[error("stored chain is inconsistent: {0}")]
    InconsistentChain(#[from] HeadError),
}

impl PartialEq for StorageError {
    fn eq(&self, other: &Self) -> bool {
        use StorageError::*;
        match (self, other) {
            (Database(a), Database(b)) => a == b,
            (DatabaseInit(a), DatabaseInit(b)) => format!("{a}") == format!("{b}"),
            (InconsistentChain(a), InconsistentChain(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for StorageError {}
