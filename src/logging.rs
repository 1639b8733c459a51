use std::error::Error;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global subscriber. Logs go to stderr so emitted snapshots
/// on stdout stay machine readable.
pub fn init(config: &LoggingConfig) -> Result<(), Box<dyn Error + Send + Sync>> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(&config.level))
        .with_writer(std::io::stderr);

    #[cfg(feature = "perf-tracing")]
    let builder = builder.with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE);

    if config.json {
        builder.with_ansi(false).json().try_init()
    } else {
        builder.try_init()
    }
}

/// `RUST_LOG` wins over the configured level; an unparsable level falls
/// back to `info`.
fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
