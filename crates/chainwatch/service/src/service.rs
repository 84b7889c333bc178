//! Contains the main chainwatch service runner.

use crate::{ChainwatchActor, Config, HeadTrackerActor, MetricWorker};
use anyhow::{Result, anyhow, bail};
use chainwatch_core::{
    AlloyChainClient, ChainClient, HeadBroadcaster, HeadTracker, LogBroadcaster, Unsubscriber,
};
use chainwatch_storage::ChainDb;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Interval between two metric reports of the database.
const METRIC_REPORT_INTERVAL: Duration = Duration::from_secs(30);

/// The chainwatch service. Owns every component and the tasks that drive them.
///
/// Call [`Service::initialise`] first, attach consumers to [`Service::head_broadcaster`] and
/// [`Service::log_broadcaster`], then drive the service with [`Service::run`].
#[derive(Debug)]
pub struct Service {
    config: Arc<Config>,

    head_broadcaster: HeadBroadcaster,
    log_broadcaster: Option<Arc<LogBroadcaster<AlloyChainClient>>>,
    log_unsubscriber: Option<Unsubscriber>,

    cancel_token: CancellationToken,
    join_set: JoinSet<Result<()>>,
}

impl Service {
    /// Creates a new service instance.
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            head_broadcaster: HeadBroadcaster::new(),
            log_broadcaster: None,
            log_unsubscriber: None,
            cancel_token: CancellationToken::new(),
            join_set: JoinSet::new(),
        }
    }

    /// The broadcaster of new longest chains.
    pub const fn head_broadcaster(&self) -> &HeadBroadcaster {
        &self.head_broadcaster
    }

    /// The log broadcaster, available once the service is initialised.
    pub const fn log_broadcaster(&self) -> Option<&Arc<LogBroadcaster<AlloyChainClient>>> {
        self.log_broadcaster.as_ref()
    }

    /// Opens the database, connects to the remote node and starts every component.
    pub async fn initialise(&mut self) -> Result<()> {
        if self.log_broadcaster.is_some() {
            bail!("service already initialised");
        }

        let db = self.init_database()?;
        let client = self.init_client().await?;

        self.init_head_broadcaster();
        self.init_log_broadcaster(client.clone(), db.clone())?;
        self.init_head_tracker(client, db.clone()).await?;
        if self.config.metrics_enabled {
            self.init_metric_reporter(db);
        }
        Ok(())
    }

    fn init_database(&self) -> Result<Arc<ChainDb>> {
        let chain_id = self.config.head_tracker.chain_id;
        info!(target: "chainwatch::service", chain_id, datadir = %self.config.datadir.display(), "Initialising database...");

        let mut db = ChainDb::new(chain_id, &self.config.datadir)?;
        if self.config.metrics_enabled {
            db = db.with_metrics();
        }
        Ok(Arc::new(db))
    }

    async fn init_client(&self) -> Result<AlloyChainClient> {
        info!(target: "chainwatch::service", url = %self.config.rpc_url, "Connecting to remote node...");
        let mut client = AlloyChainClient::connect(&self.config.rpc_url).await.map_err(|err| {
            error!(target: "chainwatch::service", %err, "Failed to connect to remote node");
            anyhow!("failed to connect to {}: {err}", self.config.rpc_url)
        })?;

        let expected = self.config.head_tracker.chain_id;
        if client.chain_id() != expected {
            bail!("remote node serves chain {}, expected {expected}", client.chain_id());
        }
        if self.config.metrics_enabled {
            client = client.with_metrics();
        }
        Ok(client)
    }

    fn init_head_broadcaster(&mut self) {
        let broadcaster = self.head_broadcaster.clone();
        let cancel_token = self.cancel_token.clone();
        self.join_set.spawn(async move {
            broadcaster.run(cancel_token).await;
            Ok(())
        });
    }

    fn init_log_broadcaster(&mut self, client: AlloyChainClient, db: Arc<ChainDb>) -> Result<()> {
        info!(target: "chainwatch::service", "Initialising log broadcaster...");
        let mut broadcaster =
            LogBroadcaster::new(self.config.log_broadcaster.clone(), client, db)?;
        if self.config.metrics_enabled {
            broadcaster = broadcaster.with_metrics();
        }
        let broadcaster = Arc::new(broadcaster);

        let (_, unsubscriber) = self.head_broadcaster.subscribe(broadcaster.clone());
        self.log_unsubscriber = Some(unsubscriber);
        self.log_broadcaster = Some(broadcaster.clone());

        let cancel_token = self.cancel_token.clone();
        self.join_set.spawn(async move { Ok(broadcaster.run(cancel_token).await?) });
        Ok(())
    }

    async fn init_head_tracker(&mut self, client: AlloyChainClient, db: Arc<ChainDb>) -> Result<()> {
        info!(target: "chainwatch::service", "Initialising head tracker...");
        let mut tracker = HeadTracker::new(
            self.config.head_tracker.clone(),
            client,
            db,
            self.head_broadcaster.clone(),
            self.cancel_token.clone(),
        )?;
        if self.config.metrics_enabled {
            tracker = tracker.with_metrics();
        }
        let tracker = Arc::new(tracker);
        tracker.start().await?;

        self.join_set.spawn(async move {
            HeadTrackerActor::new(tracker).start().await.map_err(|err| anyhow!(err))
        });
        Ok(())
    }

    fn init_metric_reporter(&mut self, db: Arc<ChainDb>) {
        let cancel_token = self.cancel_token.clone();
        self.join_set.spawn(async move {
            MetricWorker::new(METRIC_REPORT_INTERVAL, vec![db], cancel_token)
                .start()
                .await
                .map_err(|err| anyhow!("{err:?}"))
        });
    }

    /// Waits for the service tasks. The first failing task stops the others.
    pub async fn run(&mut self) -> Result<()> {
        while let Some(joined) = self.join_set.join_next().await {
            match joined {
                Ok(Ok(())) => {
                    info!(target: "chainwatch::service", "Task completed successfully.");
                }
                Ok(Err(err)) => {
                    error!(target: "chainwatch::service", %err, "A task encountered an error.");
                    self.cancel_token.cancel();
                    return Err(anyhow!("a service task failed: {err}"));
                }
                Err(err) => {
                    error!(target: "chainwatch::service", %err, "A task panicked.");
                    self.cancel_token.cancel();
                    return Err(anyhow!("a service task failed: {err}"));
                }
            }
        }
        Ok(())
    }

    /// Cancels every task and waits for them to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(unsubscriber) = self.log_unsubscriber.take() {
            unsubscriber.unsubscribe();
        }
        self.cancel_token.cancel();

        while let Some(joined) = self.join_set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(target: "chainwatch::service", %err, "A task encountered an error during shutdown.");
                }
                Err(err) => {
                    error!(target: "chainwatch::service", %err, "A task panicked during shutdown.");
                }
            }
        }
        info!(target: "chainwatch::service", "Service shut down");
        Ok(())
    }
}
