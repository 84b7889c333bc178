//! Runnable service layer for chainwatch.
//!
//! Wires the database, the remote node client, the head tracker and both broadcasters together
//! and supervises the tasks that drive them.

mod config;
pub use config::Config;

mod service;
pub use service::Service;

mod actors;
pub use actors::{ChainwatchActor, HeadTrackerActor, MetricWorker};
