//! Metrics for head tracking.

/// Container for metrics.
#[derive(Debug, Clone)]
pub(crate) struct Metrics;

impl Metrics {
    /// Counter of heads handed to the tracker by the listener.
    pub(crate) const HEADS_RECEIVED_TOTAL: &'static str =
        "chainwatch_head_tracker_heads_received_total";
    /// Counter of heads arriving more than the finality depth below the tracked head.
    pub(crate) const VERY_OLD_HEAD_TOTAL: &'static str =
        "chainwatch_head_tracker_very_old_head_total";
    /// Counter of saved heads whose chain could not be rebuilt.
    pub(crate) const CHAIN_NOT_RECONSTRUCTABLE_TOTAL: &'static str =
        "chainwatch_head_tracker_chain_not_reconstructable_total";
    /// Gauge of the number of the longest chain's head.
    pub(crate) const CURRENT_HEAD: &'static str = "chainwatch_head_tracker_current_head";

    /// Gauge set to 1 while the head subscription is up.
    pub(crate) const LISTENER_CONNECTED: &'static str = "chainwatch_head_listener_connected";
    /// Gauge set to 1 while heads keep arriving within the idle threshold.
    pub(crate) const LISTENER_RECEIVING_HEADS: &'static str =
        "chainwatch_head_listener_receiving_heads";
    /// Counter of head subscription attempts after the first.
    pub(crate) const LISTENER_RESUBSCRIBE_TOTAL: &'static str =
        "chainwatch_head_listener_resubscribe_total";

    /// Describes the head tracking metrics and initialises them to zero.
    pub(crate) fn init() {
        Self::describe();
        Self::zero();
    }

    fn describe() {
        metrics::describe_counter!(
            Self::HEADS_RECEIVED_TOTAL,
            metrics::Unit::Count,
            "Total number of heads received from the remote node"
        );
        metrics::describe_counter!(
            Self::VERY_OLD_HEAD_TOTAL,
            metrics::Unit::Count,
            "Total number of heads received more than the finality depth below the tracked head"
        );
        metrics::describe_counter!(
            Self::CHAIN_NOT_RECONSTRUCTABLE_TOTAL,
            metrics::Unit::Count,
            "Total number of saved heads whose chain could not be rebuilt"
        );
        metrics::describe_gauge!(
            Self::CURRENT_HEAD,
            metrics::Unit::Count,
            "Number of the head of the longest tracked chain"
        );
        metrics::describe_gauge!(
            Self::LISTENER_CONNECTED,
            "Whether the head subscription is established"
        );
        metrics::describe_gauge!(
            Self::LISTENER_RECEIVING_HEADS,
            "Whether heads arrive within the idle warning threshold"
        );
        metrics::describe_counter!(
            Self::LISTENER_RESUBSCRIBE_TOTAL,
            metrics::Unit::Count,
            "Total number of head resubscriptions"
        );
    }

    fn zero() {
        metrics::counter!(Self::HEADS_RECEIVED_TOTAL).increment(0);
        metrics::counter!(Self::VERY_OLD_HEAD_TOTAL).increment(0);
        metrics::counter!(Self::CHAIN_NOT_RECONSTRUCTABLE_TOTAL).increment(0);
        metrics::counter!(Self::LISTENER_RESUBSCRIBE_TOTAL).increment(0);
        metrics::gauge!(Self::CURRENT_HEAD).set(0.0);
        metrics::gauge!(Self::LISTENER_CONNECTED).set(0.0);
        metrics::gauge!(Self::LISTENER_RECEIVING_HEADS).set(0.0);
    }
}
