use std::fs::OpenOptions;
use std::sync::Arc;

use anyhow::Context;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;

type OutputLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = build_filter(std::env::var("RUST_LOG").ok().as_deref(), &config.level)?;
    let output = output_layer(config)?;

    tracing_subscriber::registry().with(output).with(filter).try_init()?;
    Ok(())
}

/// Usable `RUST_LOG` directives replace the configured level entirely.
fn build_filter(directives: Option<&str>, level: &str) -> anyhow::Result<EnvFilter> {
    if let Some(filter) = directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
    {
        return Ok(filter);
    }

    let level: LevelFilter = level
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid log level: {level}"))?;
    Ok(EnvFilter::new(level.to_string()))
}

fn output_layer(config: &LoggingConfig) -> anyhow::Result<OutputLayer> {
    // colors only make sense on a terminal
    let (writer, ansi) = match config.file_path.as_deref() {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {path}"))?;
            (BoxMakeWriter::new(Arc::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    let layer = if config.format == "json" {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_writer(writer)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed()
    };
    Ok(layer)
}
