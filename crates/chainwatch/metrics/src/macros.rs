/// Records the outcome of a finished call.
#[doc(hidden)]
#[macro_export]
macro_rules! __record_call {
    (
        $success_metric:expr,
        $error_metric:expr,
        $duration_metric:expr,
        $method_name:expr,
        $is_ok:expr,
        $elapsed:expr $(, $tag_key:expr => $tag_val:expr )*
    ) => {{
        let outcome_metric = if $is_ok { $success_metric } else { $error_metric };
        $crate::__metrics::counter!(
            outcome_metric,
            "method" => $method_name
            $(, $tag_key => $tag_val )*
        )
        .increment(1);
        $crate::__metrics::histogram!(
            $duration_metric,
            "method" => $method_name
            $(, $tag_key => $tag_val )*
        )
        .record($elapsed);
    }};
}

/// Runs a fallible expression and records success/error counters and its duration.
///
/// ```ignore
/// observe_metrics_for_result!(
///     Metrics::SUCCESS_TOTAL,
///     Metrics::ERROR_TOTAL,
///     Metrics::DURATION_SECONDS,
///     "insert_head",
///     self.insert(head),
///     "chain_id" => chain_id.to_string()
/// )
/// ```
#[macro_export]
macro_rules! observe_metrics_for_result {
    (
        $success_metric:expr,
        $error_metric:expr,
        $duration_metric:expr,
        $method_name:expr,
        $block:expr $(, $tag_key:expr => $tag_val:expr )*
    ) => {{
        let started = std::time::Instant::now();
        let result = $block;
        $crate::__record_call!(
            $success_metric,
            $error_metric,
            $duration_metric,
            $method_name,
            result.is_ok(),
            started.elapsed().as_secs_f64()
            $(, $tag_key => $tag_val )*
        );
        result
    }};
}

/// Async counterpart of [`observe_metrics_for_result`]; awaits the given future.
#[macro_export]
macro_rules! observe_metrics_for_result_async {
    (
        $success_metric:expr,
        $error_metric:expr,
        $duration_metric:expr,
        $method_name:expr,
        $block:expr $(, $tag_key:expr => $tag_val:expr )*
    ) => {{
        let started = std::time::Instant::now();
        let result = $block.await;
        $crate::__record_call!(
            $success_metric,
            $error_metric,
            $duration_metric,
            $method_name,
            result.is_ok(),
            started.elapsed().as_secs_f64()
            $(, $tag_key => $tag_val )*
        );
        result
    }};
}
