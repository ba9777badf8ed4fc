use crate::config::LogConfig;
use crate::error::ConfigError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber.
///
/// Stdout always gets the human-readable layer. A file layer is added when
/// `log_dir` is set; the returned guard flushes it and must outlive the run.
pub fn init_logging(config: &LogConfig, verbose: bool) -> Result<Option<WorkerGuard>, ConfigError> {
    let filter = build_filter(config, verbose)?;
    let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
    let registry = tracing_subscriber::registry().with(filter).with(stdout_layer);

    let Some(log_dir) = config.log_dir.as_deref() else {
        registry.init();
        return Ok(None);
    };

    std::fs::create_dir_all(log_dir).map_err(|source| ConfigError::LogDir {
        path: log_dir.to_string(),
        source,
    })?;
    let file_appender = match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(log_dir, &config.log_file),
        "daily" => tracing_appender::rolling::daily(log_dir, &config.log_file),
        _ => tracing_appender::rolling::never(log_dir, &config.log_file),
    };
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .with_target(true) // Keep target in JSON for structured queries
            .with_writer(non_blocking)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false);
        registry.with(file_layer).init();
    }

    Ok(Some(guard))
}

/// `RUST_LOG` wins over the config; verbose forces at least debug.
fn build_filter(config: &LogConfig, verbose: bool) -> Result<EnvFilter, ConfigError> {
    if verbose {
        return Ok(EnvFilter::new("debug"));
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.log_level).map_err(|_| ConfigError::LogFilter(config.log_level.clone()))
}
