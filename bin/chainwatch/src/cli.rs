//! Contains the chainwatch CLI.

use crate::{
    consumers::{HeadLogger, LogLogger},
    flags::ChainwatchArgs,
};
use anyhow::Result;
use chainwatch_cli::{LogArgs, LogConfig, MetricsArgs};
use chainwatch_core::ListenerOpts;
use chainwatch_service::Service;
use chainwatch_types::JobId;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

/// Job the built-in log consumer acknowledges logs for.
const LOG_LOGGER_JOB_ID: JobId = 1;

/// Follows a chain head and delivers confirmed contract logs.
#[derive(Parser, Debug)]
#[command(name = "chainwatch", about = "Follows a chain head and delivers confirmed contract logs")]
pub struct Cli {
    /// Logging args
    #[command(flatten)]
    pub global: LogArgs,

    /// Prometheus metrics args
    #[command(flatten)]
    pub metrics: MetricsArgs,

    /// Chainwatch args
    #[command(flatten)]
    pub chainwatch: ChainwatchArgs,
}

impl Cli {
    /// Runs the CLI.
    pub fn run(self) -> Result<()> {
        self.metrics.init_metrics()?;
        Self::init_logs(&self.global)?;

        Self::run_until_ctrl_c(async move {
            let config = self.chainwatch.init_config(self.metrics.enabled);
            let mut service = Service::new(config);

            if let Err(err) = service.initialise().await {
                error!(target: "chainwatch", %err, "Failed to initialise chainwatch");
                service.shutdown().await?;
                return Err(err);
            }
            self.attach_consumers(&service)?;

            tokio::select! {
                res = service.run() => {
                    if let Err(err) = res {
                        error!(target: "chainwatch", %err, "Error running chainwatch service");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!(target: "chainwatch", "Ctrl+C received, initiating service shutdown...");
                }
            }

            service.shutdown().await?;
            info!(target: "chainwatch", "Chainwatch shut down gracefully.");
            Ok(())
        })
    }

    fn attach_consumers(&self, service: &Service) -> Result<()> {
        service.head_broadcaster().subscribe(Arc::new(HeadLogger));

        let Some(log_broadcaster) = service.log_broadcaster() else {
            return Ok(());
        };
        for contract in &self.chainwatch.contracts {
            let opts = ListenerOpts::new(*contract)
                .with_min_confirmations(self.chainwatch.confirmations);
            log_broadcaster.register(Arc::new(LogLogger::new(LOG_LOGGER_JOB_ID)), opts)?;
            info!(
                target: "chainwatch",
                %contract,
                confirmations = self.chainwatch.confirmations,
                "Watching contract"
            );
        }
        Ok(())
    }

    /// Run until ctrl-c is pressed.
    pub fn run_until_ctrl_c<F>(fut: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
        rt.block_on(fut)
    }

    /// Initializes the tracing stack.
    pub fn init_logs(args: &LogArgs) -> Result<()> {
        let filter = tracing_subscriber::EnvFilter::from_default_env();
        LogConfig::new(args.clone()).init_tracing_subscriber(Some(filter))?;
        Ok(())
    }
}
