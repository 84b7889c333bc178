//! Metrics for log delivery.

/// Container for metrics.
#[derive(Debug, Clone)]
pub(crate) struct Metrics;

impl Metrics {
    /// Counter of logs handed to listeners.
    pub(crate) const LOGS_DELIVERED_TOTAL: &'static str =
        "chainwatch_log_broadcaster_logs_delivered_total";
    /// Counter of logs reported as removed by the remote node.
    pub(crate) const LOGS_REMOVED_TOTAL: &'static str =
        "chainwatch_log_broadcaster_logs_removed_total";
    /// Counter of logs fetched while backfilling after a subscribe.
    pub(crate) const LOGS_BACKFILLED_TOTAL: &'static str =
        "chainwatch_log_broadcaster_logs_backfilled_total";
    /// Counter of pending logs deleted because their block left the chain.
    pub(crate) const LOGS_ORPHANED_TOTAL: &'static str =
        "chainwatch_log_broadcaster_logs_orphaned_total";
    /// Counter of pending logs pruned past finality.
    pub(crate) const LOGS_PRUNED_TOTAL: &'static str =
        "chainwatch_log_broadcaster_logs_pruned_total";
    /// Counter of log subscription attempts after the first.
    pub(crate) const RESUBSCRIBE_TOTAL: &'static str =
        "chainwatch_log_broadcaster_resubscribe_total";
    /// Gauge set to 1 while the log subscription is up.
    pub(crate) const CONNECTED: &'static str = "chainwatch_log_broadcaster_connected";
    /// Gauge of registered listeners.
    pub(crate) const REGISTRATIONS: &'static str = "chainwatch_log_broadcaster_registrations";

    /// Describes the log delivery metrics and initialises them to zero.
    pub(crate) fn init() {
        Self::describe();
        Self::zero();
    }

    fn describe() {
        metrics::describe_counter!(
            Self::LOGS_DELIVERED_TOTAL,
            metrics::Unit::Count,
            "Total number of logs handed to listeners"
        );
        metrics::describe_counter!(
            Self::LOGS_REMOVED_TOTAL,
            metrics::Unit::Count,
            "Total number of logs removed by reorgs"
        );
        metrics::describe_counter!(
            Self::LOGS_BACKFILLED_TOTAL,
            metrics::Unit::Count,
            "Total number of logs fetched while backfilling"
        );
        metrics::describe_counter!(
            Self::LOGS_ORPHANED_TOTAL,
            metrics::Unit::Count,
            "Total number of pending logs whose block left the chain"
        );
        metrics::describe_counter!(
            Self::LOGS_PRUNED_TOTAL,
            metrics::Unit::Count,
            "Total number of pending logs pruned past finality"
        );
        metrics::describe_counter!(
            Self::RESUBSCRIBE_TOTAL,
            metrics::Unit::Count,
            "Total number of log resubscriptions"
        );
        metrics::describe_gauge!(Self::CONNECTED, "Whether the log subscription is established");
        metrics::describe_gauge!(
            Self::REGISTRATIONS,
            metrics::Unit::Count,
            "Number of registered log listeners"
        );
    }

    fn zero() {
        metrics::counter!(Self::LOGS_DELIVERED_TOTAL).increment(0);
        metrics::counter!(Self::LOGS_REMOVED_TOTAL).increment(0);
        metrics::counter!(Self::LOGS_BACKFILLED_TOTAL).increment(0);
        metrics::counter!(Self::LOGS_ORPHANED_TOTAL).increment(0);
        metrics::counter!(Self::LOGS_PRUNED_TOTAL).increment(0);
        metrics::counter!(Self::RESUBSCRIBE_TOTAL).increment(0);
        metrics::gauge!(Self::CONNECTED).set(0.0);
        metrics::gauge!(Self::REGISTRATIONS).set(0.0);
    }
}
