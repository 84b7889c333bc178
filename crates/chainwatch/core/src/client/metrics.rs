//! Metrics for the RPC client.

/// Container for metrics.
#[derive(Debug, Clone)]
pub(crate) struct Metrics;

impl Metrics {
    /// Identifier for the counter of successful RPC requests. Labels: `method`.
    pub(crate) const RPC_REQUESTS_SUCCESS_TOTAL: &'static str =
        "chainwatch_rpc_requests_success_total";
    /// Identifier for the counter of failed RPC requests. Labels: `method`.
    pub(crate) const RPC_REQUESTS_ERROR_TOTAL: &'static str = "chainwatch_rpc_requests_error_total";
    /// Identifier for the histogram of RPC request durations. Labels: `method`.
    pub(crate) const RPC_REQUEST_DURATION_SECONDS: &'static str =
        "chainwatch_rpc_request_duration_seconds";

    pub(crate) const RPC_METHOD_CHAIN_ID: &'static str = "chain_id";
    pub(crate) const RPC_METHOD_HEADER_BY_NUMBER: &'static str = "header_by_number";
    pub(crate) const RPC_METHOD_SUBSCRIBE_NEW_HEADS: &'static str = "subscribe_new_heads";
    pub(crate) const RPC_METHOD_FILTER_LOGS: &'static str = "filter_logs";
    pub(crate) const RPC_METHOD_SUBSCRIBE_FILTER_LOGS: &'static str = "subscribe_filter_logs";

    const RPC_METHODS: [&'static str; 5] = [
        Self::RPC_METHOD_CHAIN_ID,
        Self::RPC_METHOD_HEADER_BY_NUMBER,
        Self::RPC_METHOD_SUBSCRIBE_NEW_HEADS,
        Self::RPC_METHOD_FILTER_LOGS,
        Self::RPC_METHOD_SUBSCRIBE_FILTER_LOGS,
    ];

    /// Describes the client metrics and initialises them to zero.
    pub(crate) fn init() {
        Self::describe();
        Self::zero();
    }

    fn describe() {
        metrics::describe_counter!(
            Self::RPC_REQUESTS_SUCCESS_TOTAL,
            metrics::Unit::Count,
            "Total number of successful requests to the remote node"
        );
        metrics::describe_counter!(
            Self::RPC_REQUESTS_ERROR_TOTAL,
            metrics::Unit::Count,
            "Total number of failed requests to the remote node"
        );
        metrics::describe_histogram!(
            Self::RPC_REQUEST_DURATION_SECONDS,
            metrics::Unit::Seconds,
            "Duration of requests to the remote node"
        );
    }

    fn zero() {
        for method in Self::RPC_METHODS {
            metrics::counter!(Self::RPC_REQUESTS_SUCCESS_TOTAL, "method" => method).increment(0);
            metrics::counter!(Self::RPC_REQUESTS_ERROR_TOTAL, "method" => method).increment(0);
            metrics::histogram!(Self::RPC_REQUEST_DURATION_SECONDS, "method" => method).record(0.0);
        }
    }
}
