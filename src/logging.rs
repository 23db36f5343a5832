//! Structured logging infrastructure.
//!
//! Uses the `tracing` and `tracing-subscriber` crates to provide:
//! - Structured logging with spans and events
//! - Environment-based filtering (`RUST_LOG` wins over the configured level)
//! - Multiple output formats (pretty, compact, JSON)
//!
//! # Example
//! ```no_run
//! use kitctl::logging::{self, OutputFormat, TracingConfig};
//! use tracing::Level;
//!
//! # fn main() -> Result<(), String> {
//! let config = TracingConfig::new(Level::INFO).with_format(OutputFormat::Compact);
//! logging::init(config)?;
//! tracing::info!("daemon started");
//! # Ok(())
//! # }
//! ```

use tracing::Level;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Output format for tracing
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Pretty-printed format with colors (for development)
    Pretty,
    /// Compact format without colors (for production daemons)
    Compact,
    /// JSON format for structured logging (for log aggregation)
    Json,
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level used when `RUST_LOG` is not set
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Whether to enable ANSI colors (Pretty format only)
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Create a tracing config with the given default level
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize the global tracing subscriber.
///
/// This function is idempotent: if a subscriber is already installed (tests
/// commonly race on this), it returns Ok(()) instead of an error.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_to_filter_string(config.level)));

    match config.format {
        OutputFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_ansi(config.with_ansi)
                .with_filter(env_filter);
            install(tracing_subscriber::registry().with(fmt_layer))
        }
        OutputFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_ansi(false)
                .with_filter(env_filter);
            install(tracing_subscriber::registry().with(fmt_layer))
        }
        OutputFormat::Json => {
            let fmt_layer = fmt::layer().json().with_filter(env_filter);
            install(tracing_subscriber::registry().with(fmt_layer))
        }
    }
}

fn install<S>(subscriber: S) -> Result<(), String>
where
    S: SubscriberInitExt,
{
    subscriber.try_init().or_else(|e| {
        // "already set" is expected when tests or embedding code initialized
        // tracing first
        if e.to_string()
            .contains("a global default trace dispatcher has already been set")
        {
            Ok(())
        } else {
            Err(format!("Failed to initialize tracing: {}", e))
        }
    })
}

/// Convert Level to env filter string
fn level_to_filter_string(level: Level) -> String {
    match level {
        Level::TRACE => "trace".to_string(),
        Level::DEBUG => "debug".to_string(),
        Level::INFO => "info".to_string(),
        Level::WARN => "warn".to_string(),
        Level::ERROR => "error".to_string(),
    }
}
