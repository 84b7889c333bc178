//! Persistent storage for chainwatch.
//!
//! This crate persists the two pieces of state that must survive a restart:
//! - recently seen chain heads, so that the head tracker can rebuild its chain on startup;
//! - pending logs and their per-listener broadcast records, so that a log already handled by a
//!   listener is never handed to it again.
//!
//! The storage is built on top of [`reth-db`], using MDBX.

pub mod models;
pub use models::{BroadcastKey, LogKey};

mod error;
pub use error::StorageError;

mod providers;

mod chaindb;
pub use chaindb::ChainDb;

mod metrics;
pub(crate) use metrics::Metrics;

mod traits;
pub use traits::{
    HeadStorage, HeadStorageReader, HeadStorageWriter, LogStorage, LogStorageReader,
    LogStorageWriter,
};
