//! Structured logging setup
//!
//! Installs a `tracing_subscriber` registry with an `EnvFilter` and the fmt
//! layer. `RUST_LOG` wins over the configured filter when set.

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{SdnError, SdnResult};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber from configuration
pub fn init_tracing(config: &LoggingConfig) -> SdnResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| SdnError::invalid_config("logging.filter", &config.filter, &e.to_string()))?;

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Full => registry
            .with(tracing_subscriber::fmt::layer().with_span_events(span_events))
            .try_init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact().with_span_events(span_events))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_span_events(span_events))
            .try_init(),
    };

    result.map_err(|e| SdnError::internal(format!("Failed to install tracing subscriber: {}", e)))
}

/// Initialize tracing for tests; repeated calls are ignored
pub fn init_test_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
