//! Database table schemas used by chainwatch.
//!
//! This module defines the value types, keys, and table layouts for all persisted data. The
//! tables are grouped into a [`reth_db_api::TableSet`] for database initialization.

use alloy_primitives::B256;
use reth_db_api::{
    TableSet, TableType, TableViewer,
    table::{DupSort, TableInfo},
    tables,
};
use std::fmt;

mod head;
pub use head::HeadEntry;

mod log;
pub use log::{BroadcastEntry, BroadcastKey, LogEntry, LogKey};

/// Implements [`reth_db_api::table::Compress`] and [`reth_db_api::table::Decompress`] for value
/// types that implement [`reth_codecs::Compact`].
macro_rules! impl_compression_for_compact {
    ($($name:ident),+) => {
        $(
            impl reth_db_api::table::Compress for $name {
                type Compressed = Vec<u8>;

                fn compress_to_buf<B: bytes::BufMut + AsMut<[u8]>>(&self, buf: &mut B) {
                    let _ = reth_codecs::Compact::to_compact(self, buf);
                }
            }

            impl reth_db_api::table::Decompress for $name {
                fn decompress(value: &[u8]) -> Result<$name, reth_db_api::DatabaseError> {
                    let (obj, _) = reth_codecs::Compact::from_compact(value, value.len());
                    Ok(obj)
                }
            }
        )+
    };
}

impl_compression_for_compact!(HeadEntry, LogEntry, BroadcastEntry);

tables! {
    /// Persisted heads, unique on block hash.
    table Heads {
        type Key = B256;
        type Value = HeadEntry;
    }

    /// Dup-sorted index of head hashes by block number.
    /// Several competing heads may share a number, the hash is the subkey.
    table HeadNumbers {
        type Key = u64;
        type Value = B256;
        type SubKey = B256;
    }

    /// Logs waiting for delivery, ordered by block number, block hash and log index.
    table Logs {
        type Key = LogKey;
        type Value = LogEntry;
    }

    /// Per listener broadcast record of a pending log.
    /// - Key: [`BroadcastKey`] - the log plus the job id of the listener
    /// - Value: [`BroadcastEntry`] - whether the listener acknowledged the log
    table LogBroadcasts {
        type Key = BroadcastKey;
        type Value = BroadcastEntry;
    }
}
