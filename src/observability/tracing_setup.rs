// observability/tracing_setup.rs - Tracing Configuration

use serde::{Deserialize, Serialize};
use tracing::Subscriber;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer,
};

/// Tracing output format
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracingFormat {
    /// Human-readable format (default)
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for log aggregation
    Json,
}

impl std::str::FromStr for TracingFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Configuration for tracing
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Log level filter (e.g., "info", "swarm_coordination=debug")
    pub filter: String,

    pub format: TracingFormat,

    /// Log span open and close, useful around fulfillment rounds
    pub with_span_events: bool,
    pub with_file: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    /// Ignored for JSON output
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: "info,swarm_coordination=debug".into(),
            format: TracingFormat::Pretty,
            with_span_events: false,
            with_file: false,
            with_target: true,
            with_thread_ids: false,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// JSON output, info level
    pub fn production() -> Self {
        Self {
            filter: "info,swarm_coordination=info".into(),
            format: TracingFormat::Json,
            with_ansi: false,
            ..Self::default()
        }
    }

    /// Pretty output with spans, file locations and thread ids
    pub fn development() -> Self {
        Self {
            filter: "debug,swarm_coordination=trace".into(),
            format: TracingFormat::Pretty,
            with_span_events: true,
            with_file: true,
            with_target: true,
            with_thread_ids: true,
            with_ansi: true,
        }
    }
}

/// Initialize the global tracing subscriber
///
/// Call once at startup. A second call is ignored with a warning.
pub fn init_tracing(config: TracingConfig) {
    if let Err(e) = try_init_tracing(config) {
        tracing::warn!(error = %e, "Tracing already initialized");
    }
}

/// Initialize the global tracing subscriber, reporting if one is already set
pub fn try_init_tracing(config: TracingConfig) -> Result<(), TryInitError> {
    // RUST_LOG wins over the configured filter
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(output_layer(&config))
        .try_init()?;

    tracing::info!(
        filter = %config.filter,
        format = ?config.format,
        "Tracing initialized"
    );
    Ok(())
}

/// Formatting layer for the chosen output; JSON never carries ANSI codes
fn output_layer<S>(config: &TracingConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span> + 'static,
{
    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = fmt::layer()
        .with_span_events(span_events)
        .with_file(config.with_file)
        .with_line_number(config.with_file)
        .with_target(config.with_target)
        .with_thread_ids(config.with_thread_ids);

    match config.format {
        TracingFormat::Pretty => layer.with_ansi(config.with_ansi).boxed(),
        TracingFormat::Compact => layer.compact().with_ansi(config.with_ansi).boxed(),
        TracingFormat::Json => layer.json().with_ansi(false).boxed(),
    }
}
