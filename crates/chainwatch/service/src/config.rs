use chainwatch_core::{HeadTrackerConfig, LogBroadcasterConfig};
use std::path::PathBuf;

/// Everything the service needs to wire its components.
#[derive(Debug, Clone, derive_more::Constructor)]
pub struct Config {
    /// Websocket URL of the remote node.
    pub rpc_url: String,
    /// Directory holding the database.
    pub datadir: PathBuf,
    /// Head tracker configuration. Its chain id must match the remote node.
    pub head_tracker: HeadTrackerConfig,
    /// Log broadcaster configuration.
    pub log_broadcaster: LogBroadcasterConfig,
    /// Whether components record metrics.
    pub metrics_enabled: bool,
}
