//! Telemetry and tracing utilities
//!
//! The crate itself only emits `tracing` events; this module is a convenience
//! for binaries and tests that want a subscriber installed with sensible
//! filters for `sse_publisher` targets.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sse_publisher::telemetry::{init_subscriber, OutputFormat, SubscriberConfig};
//!
//! let config = SubscriberConfig::builder()
//!     .log_level(tracing::Level::DEBUG)
//!     .output_format(OutputFormat::Json)
//!     .build();
//! let _guard = init_subscriber(config)?;
//! ```

use crate::error::{PublisherError, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Output format for tracing logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format
    Json,
    /// Compact JSON format
    JsonCompact,
}

/// Configuration for tracing subscriber
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Log level
    pub log_level: tracing::Level,
    /// Output format
    pub output_format: OutputFormat,
    /// Enable console output
    pub enable_console: bool,
    /// Log file path (optional)
    pub log_file: Option<std::path::PathBuf>,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            log_level: tracing::Level::INFO,
            output_format: OutputFormat::Text,
            enable_console: true,
            log_file: None,
        }
    }
}

impl SubscriberConfig {
    /// Create a new builder for SubscriberConfig
    pub fn builder() -> SubscriberConfigBuilder {
        SubscriberConfigBuilder::default()
    }

    /// Create a debug configuration
    pub fn debug() -> Self {
        Self {
            log_level: tracing::Level::DEBUG,
            ..Self::default()
        }
    }
}

/// Builder for SubscriberConfig
#[derive(Debug, Default)]
pub struct SubscriberConfigBuilder {
    log_level: Option<tracing::Level>,
    output_format: Option<OutputFormat>,
    enable_console: Option<bool>,
    log_file: Option<std::path::PathBuf>,
}

impl SubscriberConfigBuilder {
    /// Set the log level
    pub fn log_level(mut self, level: tracing::Level) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Set the log level from a string
    pub fn log_level_str(mut self, level: &str) -> Result<Self> {
        self.log_level = Some(parse_level(level)?);
        Ok(self)
    }

    /// Set the output format
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    /// Enable or disable console output
    pub fn enable_console(mut self, enable: bool) -> Self {
        self.enable_console = Some(enable);
        self
    }

    /// Set the log file path
    pub fn log_file(mut self, path: std::path::PathBuf) -> Self {
        self.log_file = Some(path);
        self
    }

    /// Build the configuration
    pub fn build(self) -> SubscriberConfig {
        SubscriberConfig {
            log_level: self.log_level.unwrap_or(tracing::Level::INFO),
            output_format: self.output_format.unwrap_or_default(),
            enable_console: self.enable_console.unwrap_or(true),
            log_file: self.log_file,
        }
    }
}

fn parse_level(level: &str) -> Result<tracing::Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(tracing::Level::TRACE),
        "debug" => Ok(tracing::Level::DEBUG),
        "info" => Ok(tracing::Level::INFO),
        "warn" => Ok(tracing::Level::WARN),
        "error" => Ok(tracing::Level::ERROR),
        _ => Err(PublisherError::TelemetryInit(format!(
            "Invalid log level: {level}. Valid options: trace, debug, info, warn, error"
        ))),
    }
}

fn parse_format(format: &str) -> Result<OutputFormat> {
    match format.to_lowercase().as_str() {
        "json" => Ok(OutputFormat::Json),
        "json-compact" => Ok(OutputFormat::JsonCompact),
        "text" => Ok(OutputFormat::Text),
        _ => Err(PublisherError::TelemetryInit(format!(
            "Invalid log format: {format}. Valid options: text, json, json-compact"
        ))),
    }
}

fn make_writer(config: &SubscriberConfig) -> (BoxMakeWriter, Option<WorkerGuard>) {
    if let Some(path) = &config.log_file {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "sse-publisher.log".into());
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        return (BoxMakeWriter::new(writer), Some(guard));
    }
    if config.enable_console {
        (BoxMakeWriter::new(std::io::stderr), None)
    } else {
        (BoxMakeWriter::new(std::io::sink), None)
    }
}

/// Initialize tracing subscriber with the given configuration
///
/// Returns the appender guard when file logging is enabled; it must be kept
/// alive for as long as logs should be flushed. A subscriber that is already
/// installed is not an error.
pub fn init_subscriber(config: SubscriberConfig) -> Result<Option<WorkerGuard>> {
    let level = config.log_level.to_string().to_lowercase();
    let filter = format!("sse_publisher={level}");
    let (writer, guard) = make_writer(&config);

    let init_result = match config.output_format {
        OutputFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .json()
            .try_init(),
        OutputFormat::JsonCompact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .json()
            .flatten_event(true)
            .try_init(),
        OutputFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .try_init(),
    };

    match init_result {
        Ok(()) => Ok(guard),
        Err(e) => {
            let error_msg = e.to_string();
            if error_msg.contains("global default trace dispatcher has already been set") {
                Ok(guard)
            } else {
                Err(PublisherError::TelemetryInit(format!(
                    "Failed to initialize tracing: {e}"
                )))
            }
        }
    }
}

/// Initialize tracing subscriber with default configuration
pub fn init_default() -> Result<Option<WorkerGuard>> {
    init_subscriber(SubscriberConfig::default())
}

/// Initialize tracing subscriber from environment variables
///
/// Supported environment variables:
/// - `SSE_PUBLISHER_LOG_LEVEL`: Log level (trace, debug, info, warn, error)
/// - `SSE_PUBLISHER_LOG_FORMAT`: Output format (text, json, json-compact)
/// - `SSE_PUBLISHER_LOG_FILE`: Log file path
pub fn init_from_env() -> Result<Option<WorkerGuard>> {
    init_subscriber(config_from_env(|key| std::env::var(key).ok())?)
}

fn config_from_env(lookup: impl Fn(&str) -> Option<String>) -> Result<SubscriberConfig> {
    let mut builder = SubscriberConfig::builder();
    if let Some(level) = lookup("SSE_PUBLISHER_LOG_LEVEL") {
        builder = builder.log_level_str(&level)?;
    }
    if let Some(format) = lookup("SSE_PUBLISHER_LOG_FORMAT") {
        builder = builder.output_format(parse_format(&format)?);
    }
    if let Some(path) = lookup("SSE_PUBLISHER_LOG_FILE") {
        builder = builder.log_file(std::path::PathBuf::from(path));
    }
    Ok(builder.build())
}
