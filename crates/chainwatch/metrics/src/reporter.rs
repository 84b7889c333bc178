/// A component that publishes gauges describing its current state.
///
/// Implementors are polled periodically by the service's metric worker.
pub trait MetricsReporter {
    /// Samples the component state and records it.
    fn report_metrics(&self);
}
