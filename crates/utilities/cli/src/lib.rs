//! Shared CLI utilities for chainwatch binaries: logging flags, tracing setup and the prometheus
//! exporter.

mod log;
pub use log::{FileLogConfig, LogArgs, LogConfig, LogRotation, StdoutLogConfig};

mod tracing;
pub use self::tracing::{LogFormat, init_test_tracing};

mod metrics;
pub use metrics::MetricsArgs;

mod prometheus;
pub use prometheus::{PrometheusError, init_prometheus_server};
