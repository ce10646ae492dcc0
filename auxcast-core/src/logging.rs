use std::fs::File;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(anyhow::anyhow!("unknown log format: {other}")),
        }
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. JSON output is
/// for production ingestion, pretty for terminals; either can be pointed
/// at a file with `logging.file_path`.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let format = LogFormat::from_str(&config.format)?;

    let filter = EnvFilter::builder()
        .with_default_directive(level_filter(&config.level)?.into())
        .from_env_lossy();

    let sink = config
        .file_path
        .as_deref()
        .map(|path| {
            File::options()
                .create(true)
                .append(true)
                .open(path)
                .map(Arc::new)
                .with_context(|| format!("opening log file {path}"))
        })
        .transpose()?;

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match (format, sink) {
        (LogFormat::Json, Some(file)) => json_layer().with_writer(file).boxed(),
        (LogFormat::Json, None) => json_layer().boxed(),
        (LogFormat::Pretty, Some(file)) => pretty_layer().with_writer(file).boxed(),
        (LogFormat::Pretty, None) => pretty_layer().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .init();

    Ok(())
}

fn json_layer() -> fmt::Layer<Registry, fmt::format::JsonFields, fmt::format::Format<fmt::format::Json>> {
    fmt::layer()
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_current_span(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
}

fn pretty_layer() -> fmt::Layer<Registry, fmt::format::Pretty, fmt::format::Format<fmt::format::Pretty>> {
    fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(false)
        .with_line_number(true)
}

fn level_filter(level: &str) -> anyhow::Result<LevelFilter> {
    // "warning" is accepted as an alias for "warn"
    let normalized = if level.eq_ignore_ascii_case("warning") {
        "warn"
    } else {
        level
    };
    LevelFilter::from_str(normalized).map_err(|_| anyhow::anyhow!("invalid log level: {level}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter_accepts_known_levels() {
        for level in ["trace", "debug", "info", "warn", "warning", "error", "INFO"] {
            assert!(level_filter(level).is_ok(), "{level} should parse");
        }
        assert!(level_filter("verbose").is_err());
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!(LogFormat::from_str("json").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("PRETTY").unwrap(), LogFormat::Pretty);
        assert!(LogFormat::from_str("text").is_err());
    }
}
