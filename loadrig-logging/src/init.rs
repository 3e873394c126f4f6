use crate::error::LoggingError;
use loadrig_config::{LogFormat, LogLevel, LogTarget, LoggingConfig, Rotation};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Keeps the non-blocking file writers alive; drop it last so buffered
/// lines are flushed on exit.
#[must_use = "dropping the guard stops file logging"]
#[derive(Default)]
pub struct LoggingGuard {
    guards: Vec<WorkerGuard>,
}

impl LoggingGuard {
    /// Number of file targets being written
    pub fn file_targets(&self) -> usize {
        self.guards.len()
    }
}

/// Initialize logging from configuration
///
/// Returns `Ok` without touching anything when a global subscriber is
/// already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    let mut guard = LoggingGuard::default();
    let layers = build_layers(config, &mut guard)?;

    if tracing_subscriber::registry().with(layers).try_init().is_err() {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(guard)
}

/// Initialize simple tracing for basic console output
pub fn init_simple_tracing(log_level: &str) -> Result<(), LoggingError> {
    let env_filter = EnvFilter::try_new(log_level).map_err(|e| LoggingError::InvalidFilter {
        directive: log_level.to_string(),
        message: e.to_string(),
    })?;

    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

/// Filter at `level`, with any `RUST_LOG` directives layered on top
pub fn build_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level_filter(level).into())
        .from_env_lossy()
}

fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    }
}

fn build_layers(
    config: &LoggingConfig,
    guard: &mut LoggingGuard,
) -> Result<Vec<BoxedLayer>, LoggingError> {
    let mut layers = Vec::with_capacity(config.targets.len().max(1));

    for target in &config.targets {
        let layer = match target {
            LogTarget::Console { level } => {
                let filter = build_filter(level.unwrap_or(config.level));
                format_layer(config.format, std::io::stderr, true, config.include_location)
                    .with_filter(filter)
                    .boxed()
            }
            LogTarget::File {
                directory,
                file_prefix,
                rotation,
                level,
            } => {
                let appender = file_appender(directory, file_prefix, *rotation)?;
                let (writer, worker) = tracing_appender::non_blocking(appender);
                guard.guards.push(worker);

                let filter = build_filter(level.unwrap_or(config.level));
                format_layer(config.format, writer, false, config.include_location)
                    .with_filter(filter)
                    .boxed()
            }
        };
        layers.push(layer);
    }

    // A config with no targets still gets console output
    if layers.is_empty() {
        layers.push(
            format_layer(config.format, std::io::stderr, true, config.include_location)
                .with_filter(build_filter(config.level))
                .boxed(),
        );
    }

    Ok(layers)
}

fn format_layer<W>(format: LogFormat, writer: W, ansi: bool, include_location: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_file(include_location)
        .with_line_number(include_location);

    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Text => layer.boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
    }
}

fn file_appender(
    directory: &str,
    file_prefix: &str,
    rotation: Rotation,
) -> Result<tracing_appender::rolling::RollingFileAppender, LoggingError> {
    let dir = Path::new(directory);
    std::fs::create_dir_all(dir).map_err(|source| LoggingError::Directory {
        path: directory.to_string(),
        source,
    })?;

    Ok(match rotation {
        Rotation::Hourly => tracing_appender::rolling::hourly(dir, file_prefix),
        Rotation::Daily => tracing_appender::rolling::daily(dir, file_prefix),
        Rotation::Never => tracing_appender::rolling::never(dir, file_prefix),
    })
}
