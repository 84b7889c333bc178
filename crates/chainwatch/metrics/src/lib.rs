//! Metrics helpers shared across chainwatch components.
//!
//! The macros in this crate wrap a fallible call and record, under a `method` label, a success or
//! error counter and a duration histogram. Components keep their own metric names as constants
//! and call `describe` / `zero` on startup.

mod macros;

mod reporter;
pub use reporter::MetricsReporter;

#[doc(hidden)]
pub use metrics as __metrics;
