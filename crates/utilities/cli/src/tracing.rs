//! [tracing_subscriber] setup.

use crate::{FileLogConfig, LogConfig, LogRotation};
use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    prelude::__tracing_subscriber_SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

/// Name of the rolling log files.
const LOG_FILE_NAME: &str = "chainwatch.log";

/// The format of the logs.
#[derive(
    Default, Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lowercase")]
pub enum LogFormat {
    /// Full format (default).
    #[default]
    Full,
    /// JSON format.
    Json,
    /// Pretty format.
    Pretty,
    /// Compact format.
    Compact,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

impl LogFormat {
    fn layer(self) -> BoxedLayer {
        match self {
            Self::Full => tracing_subscriber::fmt::layer().boxed(),
            Self::Json => tracing_subscriber::fmt::layer().json().boxed(),
            Self::Pretty => tracing_subscriber::fmt::layer().pretty().boxed(),
            Self::Compact => tracing_subscriber::fmt::layer().compact().boxed(),
        }
    }

    fn file_layer(self, appender: RollingFileAppender) -> BoxedLayer {
        let layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(appender);
        match self {
            Self::Full => layer.boxed(),
            Self::Json => layer.json().boxed(),
            Self::Pretty => layer.pretty().boxed(),
            Self::Compact => layer.compact().boxed(),
        }
    }
}

impl FileLogConfig {
    fn appender(&self) -> RollingFileAppender {
        let directory = &self.directory_path;
        match self.rotation {
            LogRotation::Minutely => rolling::minutely(directory, LOG_FILE_NAME),
            LogRotation::Hourly => rolling::hourly(directory, LOG_FILE_NAME),
            LogRotation::Daily => rolling::daily(directory, LOG_FILE_NAME),
            LogRotation::Never => rolling::never(directory, LOG_FILE_NAME),
        }
    }
}

impl LogConfig {
    /// Installs the global tracing subscriber.
    ///
    /// `env_filter` defaults to the `RUST_LOG` environment variable; the configured global level
    /// is added on top of it.
    pub fn init_tracing_subscriber(
        &self,
        env_filter: Option<EnvFilter>,
    ) -> Result<(), TryInitError> {
        let mut layers: Vec<BoxedLayer> = Vec::new();
        if let Some(file_logs) = &self.file_logs {
            layers.push(file_logs.format.file_layer(file_logs.appender()));
        }
        if let Some(stdout_logs) = self.stdout_logs {
            layers.push(stdout_logs.format.layer());
        }

        let env_filter = env_filter
            .unwrap_or_else(EnvFilter::from_default_env)
            .add_directive(self.global_level.into());

        tracing_subscriber::registry().with(layers).with(env_filter).try_init()
    }
}

/// Installs the default subscriber for tests. Later calls are no-ops.
pub fn init_test_tracing() {
    let _ = LogConfig::default().init_tracing_subscriber(None);
}
