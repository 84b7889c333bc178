use alloy_primitives::ChainId;

/// Container for ChainDb metrics.
#[derive(Debug, Clone)]
pub(crate) struct Metrics;

impl Metrics {
    pub(crate) const STORAGE_REQUESTS_SUCCESS_TOTAL: &'static str =
        "chainwatch_storage_success_total";
    pub(crate) const STORAGE_REQUESTS_ERROR_TOTAL: &'static str = "chainwatch_storage_error_total";
    pub(crate) const STORAGE_REQUEST_DURATION_SECONDS: &'static str =
        "chainwatch_storage_duration_seconds";
    pub(crate) const STORAGE_STORED_HEADS: &'static str = "chainwatch_storage_stored_heads";
    pub(crate) const STORAGE_PENDING_LOGS: &'static str = "chainwatch_storage_pending_logs";

    pub(crate) const STORAGE_METHOD_HEAD_BY_HASH: &'static str = "head_by_hash";
    pub(crate) const STORAGE_METHOD_LATEST_HEAD: &'static str = "latest_head";
    pub(crate) const STORAGE_METHOD_LATEST_HEADS: &'static str = "latest_heads";
    pub(crate) const STORAGE_METHOD_CHAIN: &'static str = "chain";
    pub(crate) const STORAGE_METHOD_INSERT_HEAD: &'static str = "insert_head";
    pub(crate) const STORAGE_METHOD_TRIM_OLD_HEADS: &'static str = "trim_old_heads";
    pub(crate) const STORAGE_METHOD_WAS_BROADCAST_CONSUMED: &'static str =
        "was_broadcast_consumed";
    pub(crate) const STORAGE_METHOD_UNCONSUMED_LOGS_PRIOR_TO_BLOCK: &'static str =
        "unconsumed_logs_prior_to_block";
    pub(crate) const STORAGE_METHOD_UPSERT_LOG: &'static str = "upsert_log";
    pub(crate) const STORAGE_METHOD_UPSERT_UNCONSUMED_BROADCAST: &'static str =
        "upsert_unconsumed_broadcast_for_listener";
    pub(crate) const STORAGE_METHOD_MARK_BROADCAST_CONSUMED: &'static str =
        "mark_broadcast_consumed";
    pub(crate) const STORAGE_METHOD_DELETE_LOG_AND_BROADCASTS: &'static str =
        "delete_log_and_broadcasts";
    pub(crate) const STORAGE_METHOD_PRUNE_LOGS_BEFORE: &'static str = "prune_logs_before";

    const STORAGE_METHODS: [&'static str; 13] = [
        Self::STORAGE_METHOD_HEAD_BY_HASH,
        Self::STORAGE_METHOD_LATEST_HEAD,
        Self::STORAGE_METHOD_LATEST_HEADS,
        Self::STORAGE_METHOD_CHAIN,
        Self::STORAGE_METHOD_INSERT_HEAD,
        Self::STORAGE_METHOD_TRIM_OLD_HEADS,
        Self::STORAGE_METHOD_WAS_BROADCAST_CONSUMED,
        Self::STORAGE_METHOD_UNCONSUMED_LOGS_PRIOR_TO_BLOCK,
        Self::STORAGE_METHOD_UPSERT_LOG,
        Self::STORAGE_METHOD_UPSERT_UNCONSUMED_BROADCAST,
        Self::STORAGE_METHOD_MARK_BROADCAST_CONSUMED,
        Self::STORAGE_METHOD_DELETE_LOG_AND_BROADCASTS,
        Self::STORAGE_METHOD_PRUNE_LOGS_BEFORE,
    ];

    pub(crate) fn init(chain_id: ChainId) {
        Self::describe();
        Self::zero(chain_id);
    }

    fn describe() {
        metrics::describe_counter!(
            Self::STORAGE_REQUESTS_SUCCESS_TOTAL,
            metrics::Unit::Count,
            "Total number of successful chainwatch storage requests"
        );
        metrics::describe_counter!(
            Self::STORAGE_REQUESTS_ERROR_TOTAL,
            metrics::Unit::Count,
            "Total number of failed chainwatch storage requests"
        );
        metrics::describe_histogram!(
            Self::STORAGE_REQUEST_DURATION_SECONDS,
            metrics::Unit::Seconds,
            "Duration of chainwatch storage requests"
        );
        metrics::describe_gauge!(
            Self::STORAGE_STORED_HEADS,
            metrics::Unit::Count,
            "Number of heads currently persisted"
        );
        metrics::describe_gauge!(
            Self::STORAGE_PENDING_LOGS,
            metrics::Unit::Count,
            "Number of logs persisted and waiting for delivery or pruning"
        );
    }

    fn zero(chain_id: ChainId) {
        for method_name in Self::STORAGE_METHODS {
            metrics::counter!(
                Self::STORAGE_REQUESTS_SUCCESS_TOTAL,
                "method" => method_name,
                "chain_id" => chain_id.to_string()
            )
            .increment(0);
            metrics::counter!(
                Self::STORAGE_REQUESTS_ERROR_TOTAL,
                "method" => method_name,
                "chain_id" => chain_id.to_string()
            )
            .increment(0);
            metrics::histogram!(
                Self::STORAGE_REQUEST_DURATION_SECONDS,
                "method" => method_name,
                "chain_id" => chain_id.to_string()
            )
            .record(0.0);
        }
    }
}
