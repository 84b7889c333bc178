//! Flags of the chainwatch binary.

mod chainwatch;
pub use chainwatch::ChainwatchArgs;
