//! Main telemetry system implementation

use crate::{
    config::{LogFormat, TelemetryConfig},
    Error, Result,
};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Entry point that installs the global tracing subscriber
pub struct TelemetrySystem;

/// Guard that keeps the background log writer alive; drop it last
pub struct TelemetryGuard {
    _file_guard: Option<WorkerGuard>,
}

impl TelemetrySystem {
    /// Initialize the telemetry system with the given configuration
    pub async fn init(config: TelemetryConfig) -> Result<TelemetryGuard> {
        if !config.enabled {
            return Ok(TelemetryGuard { _file_guard: None });
        }

        config.validate()?;

        let mut layers: Vec<BoxedLayer> = Vec::new();
        if let Some(layer) = Self::build_console_layer(&config) {
            layers.push(layer);
        }

        let file_guard = match Self::build_file_layer(&config).await? {
            Some((layer, guard)) => {
                layers.push(layer);
                Some(guard)
            }
            None => None,
        };

        tracing_subscriber::registry()
            .with(layers)
            .with(Self::build_env_filter(&config)?)
            .try_init()
            .map_err(|e| Error::System {
                message: format!("Failed to initialize tracing subscriber: {}", e),
            })?;

        tracing::info!(
            telemetry.event = "system_initialized",
            telemetry.version = env!("CARGO_PKG_VERSION"),
            level = ?config.logging.level,
            file_logging = config.logging.file_enabled,
            "Telemetry system initialized"
        );

        Ok(TelemetryGuard {
            _file_guard: file_guard,
        })
    }

    /// Build environment filter for log level filtering
    fn build_env_filter(config: &TelemetryConfig) -> Result<EnvFilter> {
        if let Ok(env_filter) = std::env::var("RUST_LOG") {
            return EnvFilter::try_new(env_filter).map_err(|e| Error::Config {
                message: format!("Invalid RUST_LOG directive: {}", e),
            });
        }

        let level: Level = config.logging.level.into();
        Ok(EnvFilter::new(level.to_string().to_lowercase()))
    }

    fn build_console_layer(config: &TelemetryConfig) -> Option<BoxedLayer> {
        if !config.logging.console_enabled {
            return None;
        }

        let logging = &config.logging;
        let layer = match logging.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(logging.include_location)
                .with_line_number(logging.include_location)
                .with_thread_ids(logging.include_thread_info)
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(logging.include_location)
                .with_line_number(logging.include_location)
                .with_thread_ids(logging.include_thread_info)
                .boxed(),
            LogFormat::Compact => fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_file(logging.include_location)
                .with_line_number(logging.include_location)
                .with_thread_ids(logging.include_thread_info)
                .boxed(),
        };

        Some(layer)
    }

    /// Build file logging layer
    async fn build_file_layer(config: &TelemetryConfig) -> Result<Option<(BoxedLayer, WorkerGuard)>> {
        if !config.logging.file_enabled {
            return Ok(None);
        }

        tokio::fs::create_dir_all(&config.logging.log_dir).await?;

        let appender = tracing_appender::rolling::daily(
            &config.logging.log_dir,
            format!("{}.log", config.logging.log_file_name),
        );
        let (writer, guard) = tracing_appender::non_blocking(appender);

        let logging = &config.logging;
        let layer = match logging.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_file(logging.include_location)
                .with_line_number(logging.include_location)
                .boxed(),
            LogFormat::Pretty | LogFormat::Compact => fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_file(logging.include_location)
                .with_line_number(logging.include_location)
                .boxed(),
        };

        Ok(Some((layer, guard)))
    }
}
