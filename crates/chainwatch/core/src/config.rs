//! Configuration of the head tracker and the log broadcaster.

use alloy_primitives::ChainId;
use backon::ExponentialBuilder;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while validating a configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The in-memory history cannot be shallower than the finality depth.
    #[error("history depth {history_depth} is below finality depth {finality_depth}")]
    HistoryShallowerThanFinality {
        /// Configured history depth.
        history_depth: u64,
        /// Configured finality depth.
        finality_depth: u64,
    },

    /// A value that must be positive is zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Backoff applied between resubscribe attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub min_delay: Duration,
    /// Upper bound of the delay between two retries.
    pub max_delay: Duration,
    /// Whether the delay is randomised.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { min_delay: Duration::from_secs(1), max_delay: Duration::from_secs(10), jitter: true }
    }
}

impl RetryConfig {
    /// Builds an unbounded exponential backoff from this configuration.
    ///
    /// Bound it with [`ExponentialBuilder::with_max_times`] where giving up is handled.
    pub fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .without_max_times();
        if self.jitter { builder.with_jitter() } else { builder }
    }
}

/// Configuration of the head tracker and the components it drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadTrackerConfig {
    /// Chain id every received header must carry.
    pub chain_id: ChainId,
    /// Number of heights kept in memory and in the database.
    pub history_depth: u64,
    /// Depth after which a block is assumed final.
    pub finality_depth: u64,
    /// Capacity of the callback mailbox.
    pub max_buffer_size: usize,
    /// When set, only the latest buffered head is broadcast once per interval.
    pub sampling_interval: Option<Duration>,
    /// When set, the listener reports it stopped receiving heads after this much silence.
    pub block_emission_idle_warning_threshold: Option<Duration>,
    /// Upper bound for one backfill run.
    pub backfill_timeout: Duration,
    /// Upper bound for a single RPC call.
    pub rpc_timeout: Duration,
    /// Backoff between resubscribe attempts.
    pub retry: RetryConfig,
}

impl Default for HeadTrackerConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            history_depth: 100,
            finality_depth: 50,
            max_buffer_size: 3,
            sampling_interval: None,
            block_emission_idle_warning_threshold: None,
            backfill_timeout: Duration::from_secs(30),
            rpc_timeout: Duration::from_secs(15),
            retry: RetryConfig::default(),
        }
    }
}

impl HeadTrackerConfig {
    /// Checks the relations between the configured values.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.finality_depth == 0 {
            return Err(ConfigError::Zero("finality depth"));
        }
        if self.max_buffer_size == 0 {
            return Err(ConfigError::Zero("max buffer size"));
        }
        if self.history_depth < self.finality_depth {
            return Err(ConfigError::HistoryShallowerThanFinality {
                history_depth: self.history_depth,
                finality_depth: self.finality_depth,
            });
        }
        Ok(())
    }
}

/// Configuration of the log broadcaster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBroadcasterConfig {
    /// Number of blocks fetched behind the current head after every resubscribe.
    pub backfill_depth: u64,
    /// Largest block range requested in a single log query.
    pub max_block_range: u64,
    /// Attempts per backfill request before the backfill is postponed to the next subscribe.
    pub backfill_attempts: usize,
    /// Quiet period after a change of the watched contracts before resubscribing.
    pub resubscribe_debounce: Duration,
    /// Upper bound for a single RPC call.
    pub rpc_timeout: Duration,
    /// Depth after which a block is assumed final; pending logs deeper than this are pruned.
    pub finality_depth: u64,
    /// Block to replay logs from on the first subscribe, overriding the backfill depth.
    pub replay_from_block: Option<u64>,
    /// Backoff between resubscribe attempts.
    pub retry: RetryConfig,
}

impl Default for LogBroadcasterConfig {
    fn default() -> Self {
        Self {
            backfill_depth: 10,
            max_block_range: 1000,
            backfill_attempts: 5,
            resubscribe_debounce: Duration::from_secs(1),
            rpc_timeout: Duration::from_secs(30),
            finality_depth: 50,
            replay_from_block: None,
            retry: RetryConfig::default(),
        }
    }
}

impl LogBroadcasterConfig {
    /// Checks the relations between the configured values.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.finality_depth == 0 {
            return Err(ConfigError::Zero("finality depth"));
        }
        if self.max_block_range == 0 {
            return Err(ConfigError::Zero("max block range"));
        }
        if self.backfill_attempts == 0 {
            return Err(ConfigError::Zero("backfill attempts"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backon::BackoffBuilder;

    #[test]
    fn test_default_head_tracker_config_is_valid() {
        assert_eq!(HeadTrackerConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_shallow_history() {
        let config =
            HeadTrackerConfig { history_depth: 10, finality_depth: 20, ..Default::default() };
        assert_eq!(
            config.validate(),
            Err(ConfigError::HistoryShallowerThanFinality { history_depth: 10, finality_depth: 20 })
        );
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = HeadTrackerConfig { max_buffer_size: 0, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::Zero("max buffer size")));

        let config = HeadTrackerConfig { finality_depth: 0, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::Zero("finality depth")));
    }

    #[test]
    fn test_log_broadcaster_config_rejects_zero_values() {
        assert_eq!(LogBroadcasterConfig::default().validate(), Ok(()));

        let config = LogBroadcasterConfig { max_block_range: 0, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::Zero("max block range")));

        let config = LogBroadcasterConfig { backfill_attempts: 0, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::Zero("backfill attempts")));
    }

    #[test]
    fn test_backoff_stays_within_bounds() {
        let retry = RetryConfig { jitter: false, ..Default::default() };
        let delays: Vec<Duration> = retry.backoff().build().take(8).collect();
        assert_eq!(delays[0], Duration::from_secs(1));
        assert!(delays.iter().all(|delay| *delay <= Duration::from_secs(10)));
        assert_eq!(delays[7], Duration::from_secs(10));
    }
}
