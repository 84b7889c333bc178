//! Utilities for spinning up a prometheus metrics server.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use metrics_process::Collector;
use std::{
    io,
    net::{IpAddr, SocketAddr, TcpListener},
    thread,
    time::Duration,
};
use thiserror::Error;
use tracing::info;

/// Interval between two samples of the process metrics.
const PROCESS_COLLECT_INTERVAL: Duration = Duration::from_secs(60);

/// Errors raised while starting the prometheus server.
#[derive(Debug, Error)]
pub enum PrometheusError {
    /// Could not resolve a free port.
    #[error("failed to bind metrics address: {0}")]
    Bind(#[from] io::Error),

    /// The exporter could not be installed.
    #[error("failed to install prometheus exporter: {0}")]
    Install(#[from] BuildError),
}

/// Starts a prometheus metrics server on `addr:port` and collects process metrics.
///
/// With `port` 0 a free port is picked first.
pub fn init_prometheus_server(addr: IpAddr, port: u16) -> Result<SocketAddr, PrometheusError> {
    let listen_addr = if port == 0 {
        TcpListener::bind((addr, 0))?.local_addr()?
    } else {
        SocketAddr::from((addr, port))
    };

    PrometheusBuilder::new().with_http_listener(listen_addr).install()?;

    let collector = Collector::default();
    collector.describe();
    thread::spawn(move || {
        loop {
            collector.collect();
            thread::sleep(PROCESS_COLLECT_INTERVAL);
        }
    });

    info!(target: "chainwatch::prometheus", %listen_addr, "Serving metrics");
    Ok(listen_addr)
}
