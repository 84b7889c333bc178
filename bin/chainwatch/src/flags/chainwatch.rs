use alloy_primitives::{Address, ChainId};
use chainwatch_core::{HeadTrackerConfig, LogBroadcasterConfig};
use chainwatch_service::Config;
use clap::Args;
use std::{path::PathBuf, time::Duration};

/// Chainwatch configuration arguments.
#[derive(Args, Debug, Clone)]
pub struct ChainwatchArgs {
    /// Websocket URL of the remote node.
    #[arg(long = "rpc.url", env = "RPC_URL")]
    pub rpc_url: String,

    /// Chain id the remote node must serve.
    #[arg(long = "chain-id", env = "CHAIN_ID")]
    pub chain_id: ChainId,

    /// Directory to store chainwatch data.
    #[arg(long, env = "DATADIR")]
    pub datadir: PathBuf,

    /// Contracts whose logs are delivered to the log consumer.
    #[arg(long, env = "CONTRACTS", value_delimiter = ',')]
    pub contracts: Vec<Address>,

    /// Confirmations required before a log is delivered, the including block counted.
    #[arg(long, env = "CONFIRMATIONS", default_value_t = 1)]
    pub confirmations: u64,

    /// Number of heights kept in memory and in the database.
    #[arg(
        long = "head-tracker.history-depth",
        env = "HEAD_TRACKER_HISTORY_DEPTH",
        default_value_t = 100
    )]
    pub history_depth: u64,

    /// Depth after which a block is assumed final.
    #[arg(
        long = "head-tracker.finality-depth",
        env = "HEAD_TRACKER_FINALITY_DEPTH",
        default_value_t = 50
    )]
    pub finality_depth: u64,

    /// Number of new longest chains buffered for the broadcaster.
    #[arg(
        long = "head-tracker.max-buffer-size",
        env = "HEAD_TRACKER_MAX_BUFFER_SIZE",
        default_value_t = 3
    )]
    pub max_buffer_size: usize,

    /// Broadcast only the latest head once per this many seconds.
    #[arg(long = "head-tracker.sampling-interval", env = "HEAD_TRACKER_SAMPLING_INTERVAL")]
    pub sampling_interval: Option<u64>,

    /// Seconds without a new head before the listener reports it is not receiving heads.
    #[arg(
        long = "head-tracker.idle-warning-threshold",
        env = "HEAD_TRACKER_IDLE_WARNING_THRESHOLD"
    )]
    pub idle_warning_threshold: Option<u64>,

    /// Number of blocks of logs fetched behind the current head after every resubscribe.
    #[arg(long = "logs.backfill-depth", env = "LOGS_BACKFILL_DEPTH", default_value_t = 10)]
    pub backfill_depth: u64,

    /// Largest block range requested in one log backfill call.
    #[arg(long = "logs.max-block-range", env = "LOGS_MAX_BLOCK_RANGE", default_value_t = 1000)]
    pub max_block_range: u64,

    /// Replay logs from this block on startup.
    #[arg(long = "logs.replay-from-block", env = "LOGS_REPLAY_FROM_BLOCK")]
    pub replay_from_block: Option<u64>,
}

impl ChainwatchArgs {
    /// Builds the head tracker configuration.
    pub fn head_tracker_config(&self) -> HeadTrackerConfig {
        HeadTrackerConfig {
            chain_id: self.chain_id,
            history_depth: self.history_depth,
            finality_depth: self.finality_depth,
            max_buffer_size: self.max_buffer_size,
            sampling_interval: self.sampling_interval.map(Duration::from_secs),
            block_emission_idle_warning_threshold: self
                .idle_warning_threshold
                .map(Duration::from_secs),
            ..Default::default()
        }
    }

    /// Builds the log broadcaster configuration.
    pub fn log_broadcaster_config(&self) -> LogBroadcasterConfig {
        LogBroadcasterConfig {
            backfill_depth: self.backfill_depth,
            max_block_range: self.max_block_range,
            finality_depth: self.finality_depth,
            replay_from_block: self.replay_from_block,
            ..Default::default()
        }
    }

    /// Builds the service configuration.
    pub fn init_config(&self, metrics_enabled: bool) -> Config {
        Config::new(
            self.rpc_url.clone(),
            self.datadir.clone(),
            self.head_tracker_config(),
            self.log_broadcaster_config(),
            metrics_enabled,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rstest::rstest;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        chainwatch: ChainwatchArgs,
    }

    const REQUIRED: [&str; 7] =
        ["test_app", "--rpc.url", "ws://localhost:8546", "--chain-id", "1", "--datadir", "/tmp/cw"];

    fn parse(extra: &[&str]) -> ChainwatchArgs {
        TestCli::parse_from(REQUIRED.iter().chain(extra)).chainwatch
    }

    #[test]
    fn test_required_only() {
        let args = parse(&[]);
        assert_eq!(args.rpc_url, "ws://localhost:8546");
        assert_eq!(args.chain_id, 1);
        assert_eq!(args.datadir, PathBuf::from("/tmp/cw"));
        assert!(args.contracts.is_empty());
        assert_eq!(args.confirmations, 1);

        let config = args.head_tracker_config();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.history_depth, 100);
        assert_eq!(config.sampling_interval, None);
        assert_eq!(args.log_broadcaster_config().replay_from_block, None);
    }

    #[test]
    fn test_missing_rpc_url_is_rejected() {
        let parsed =
            TestCli::try_parse_from(["test_app", "--chain-id", "1", "--datadir", "/tmp/cw"]);
        assert!(parsed.is_err());
    }

    #[rstest]
    #[case::one("0x00000000000000000000000000000000000000aa", 1)]
    #[case::two(
        "0x00000000000000000000000000000000000000aa,0x00000000000000000000000000000000000000bb",
        2
    )]
    fn test_contracts_are_comma_separated(#[case] contracts: &str, #[case] expected: usize) {
        let args = parse(&["--contracts", contracts]);
        assert_eq!(args.contracts.len(), expected);
        assert_eq!(args.contracts[0], Address::with_last_byte(0xaa));
    }

    #[rstest]
    #[case::history(
        &["--head-tracker.history-depth", "80"],
        |c: &HeadTrackerConfig| c.history_depth == 80
    )]
    #[case::finality(
        &["--head-tracker.finality-depth", "5"],
        |c: &HeadTrackerConfig| c.finality_depth == 5
    )]
    #[case::buffer(
        &["--head-tracker.max-buffer-size", "7"],
        |c: &HeadTrackerConfig| c.max_buffer_size == 7
    )]
    #[case::sampling(
        &["--head-tracker.sampling-interval", "2"],
        |c: &HeadTrackerConfig| c.sampling_interval == Some(Duration::from_secs(2))
    )]
    #[case::idle(
        &["--head-tracker.idle-warning-threshold", "30"],
        |c: &HeadTrackerConfig| {
            c.block_emission_idle_warning_threshold == Some(Duration::from_secs(30))
        }
    )]
    fn test_head_tracker_flags(
        #[case] extra: &[&str],
        #[case] check: fn(&HeadTrackerConfig) -> bool,
    ) {
        assert!(check(&parse(extra).head_tracker_config()));
    }

    #[test]
    fn test_log_flags() {
        let args = parse(&[
            "--logs.backfill-depth",
            "20",
            "--logs.replay-from-block",
            "1000",
            "--logs.max-block-range",
            "250",
            "--head-tracker.finality-depth",
            "12",
            "--confirmations",
            "3",
        ]);
        let config = args.log_broadcaster_config();
        assert_eq!(config.backfill_depth, 20);
        assert_eq!(config.replay_from_block, Some(1000));
        assert_eq!(config.max_block_range, 250);
        assert_eq!(config.finality_depth, 12);
        assert_eq!(args.confirmations, 3);
    }

    #[test]
    fn test_init_config() {
        let config = parse(&[]).init_config(true);
        assert_eq!(config.rpc_url, "ws://localhost:8546");
        assert_eq!(config.head_tracker.chain_id, 1);
        assert!(config.metrics_enabled);
    }
}
