//! Tracing initialization
//!
//! Installs a JSON structured-logging subscriber filtered by `RUST_LOG`,
//! falling back to a default directive set tuned for the engine.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "info,modelship=debug,kube=info,tower=warn,hyper=warn";

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to parse the filter directives
    #[error("invalid log filter: {0}")]
    Filter(String),

    /// A global subscriber is already installed
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Configuration for telemetry initialization
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Explicit filter directives; overrides `RUST_LOG` when set
    pub filter: Option<String>,
    /// Emit human-readable lines instead of JSON
    pub pretty: bool,
}

/// Install the global tracing subscriber.
///
/// Fails if a subscriber has already been installed in this process.
pub fn init_tracing(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = match &config.filter {
        Some(directives) => EnvFilter::try_new(directives)
            .map_err(|e| TelemetryError::Filter(e.to_string()))?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };

    let (json_layer, pretty_layer) = if config.pretty {
        (None, Some(tracing_subscriber::fmt::layer().with_target(true)))
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            ),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::SubscriberInit(e.to_string())
        })
}
