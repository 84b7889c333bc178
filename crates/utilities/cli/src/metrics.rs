//! Prometheus metrics flags.

use crate::{PrometheusError, init_prometheus_server};
use clap::Args;
use std::net::{IpAddr, Ipv4Addr};

/// Flags controlling the prometheus exporter.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct MetricsArgs {
    /// Serve prometheus metrics.
    #[arg(long = "metrics.enabled", env = "METRICS_ENABLED", default_value_t = false)]
    pub enabled: bool,

    /// Address the metrics server listens on.
    #[arg(
        long = "metrics.addr",
        env = "METRICS_ADDR",
        default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    )]
    pub addr: IpAddr,

    /// Port the metrics server listens on. `0` picks a free port.
    #[arg(long = "metrics.port", env = "METRICS_PORT", default_value_t = 9090)]
    pub port: u16,
}

impl Default for MetricsArgs {
    fn default() -> Self {
        Self { enabled: false, addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED), port: 9090 }
    }
}

impl MetricsArgs {
    /// Starts the prometheus exporter if metrics are enabled.
    pub fn init_metrics(&self) -> Result<(), PrometheusError> {
        if self.enabled {
            init_prometheus_server(self.addr, self.port)?;
        }
        Ok(())
    }
}
