//! Core types shared across chainwatch components.
//!
//! This crate defines the locally tracked view of a block header ([`Head`]) together with the
//! traversal operations over its ancestor chain, and the raw event log ([`LogRecord`]) handed to
//! log listeners.

mod head;
pub use head::{ChainIter, Head, HeadError};

mod log;
pub use log::{JobId, LogConversionError, LogRecord};
