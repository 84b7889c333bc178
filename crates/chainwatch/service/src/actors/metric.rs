use crate::ChainwatchActor;
use async_trait::async_trait;
use chainwatch_metrics::MetricsReporter;
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Periodically asks every reporter to publish its gauges.
#[derive(Debug, derive_more::Constructor)]
pub struct MetricWorker<R> {
    interval: Duration,
    reporters: Vec<Arc<R>>,
    cancel_token: CancellationToken,
}

#[async_trait]
impl<R> ChainwatchActor for MetricWorker<R>
where
    R: MetricsReporter + Send + Sync + 'static,
{
    type Error = Infallible;

    async fn start(self) -> Result<(), Self::Error> {
        info!(target: "chainwatch::metric_worker", interval = ?self.interval, "Starting metric worker");

        loop {
            if self.cancel_token.is_cancelled() {
                break;
            }
            for reporter in &self.reporters {
                reporter.report_metrics();
            }

            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(target: "chainwatch::metric_worker", "Metric worker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! (
        #[derive(Debug)]
        pub Reporter {}

        impl MetricsReporter for Reporter {
            fn report_metrics(&self);
        }
    );

    #[tokio::test(start_paused = true)]
    async fn test_metric_worker_reports_every_interval() {
        let mut reporter = MockReporter::new();
        reporter.expect_report_metrics().times(3).return_const(());
        let cancel_token = CancellationToken::new();

        let worker = MetricWorker::new(
            Duration::from_millis(50),
            vec![Arc::new(reporter)],
            cancel_token.clone(),
        );
        let handle = tokio::spawn(worker.start());

        tokio::time::sleep(Duration::from_millis(120)).await;
        cancel_token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_metric_worker_stops_immediately_on_cancel() {
        let mut reporter = MockReporter::new();
        reporter.expect_report_metrics().times(0);
        let cancel_token = CancellationToken::new();

        let worker = MetricWorker::new(
            Duration::from_millis(100),
            vec![Arc::new(reporter)],
            cancel_token.clone(),
        );
        cancel_token.cancel();

        worker.start().await.unwrap();
    }
}
