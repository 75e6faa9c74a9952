//! # Logging & Tracing Infrastructure
//!
//! Configures `tracing-subscriber` for the mirror engine:
//! - Pretty, JSON and compact output formats
//! - Per-crate filtering with `RUST_LOG` override
//! - Optional span events for pass-level tracing
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
//!
//! #[core_async::main]
//! async fn main() {
//!     let config = LoggingConfig::default()
//!         .with_format(LogFormat::Compact)
//!         .with_level(LogLevel::Debug);
//!
//!     init_logging(config).expect("Failed to initialize logging");
//!     tracing::info!("Mirror started");
//! }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io;
use tracing_subscriber::{
    filter::EnvFilter, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Crates whose events are shown at the configured level by default.
const WORKSPACE_CRATES: &[&str] = &[
    "core_runtime",
    "core_sync",
    "core_service",
    "provider_cmis",
    "bridge_desktop",
];

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable pretty format with colors
    Pretty,
    /// Structured JSON format for machine parsing
    Json,
    /// Compact single-line format
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        #[cfg(debug_assertions)]
        return Self::Pretty;

        #[cfg(not(debug_assertions))]
        return Self::Json;
    }
}

/// Minimum severity of emitted events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Minimum log level for workspace crates
    pub level: LogLevel,
    /// Custom filter string (e.g., "core_sync=trace,provider_cmis=debug")
    pub filter: Option<String>,
    /// Emit span enter/exit events
    pub enable_spans: bool,
    /// Display target module in logs
    pub display_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            enable_spans: false,
            display_target: true,
        }
    }
}

impl LoggingConfig {
    /// Set log format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set minimum log level
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Set custom filter string
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Enable or disable span events
    pub fn with_spans(mut self, enable: bool) -> Self {
        self.enable_spans = enable;
        self
    }

    /// Enable or disable target display
    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }
}

/// Initialize the logging system
///
/// Call once during startup. `RUST_LOG`, when set, takes precedence over
/// both the configured level and the custom filter.
///
/// # Errors
///
/// Returns [`Error::Config`] if the filter is invalid or a global
/// subscriber is already installed.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(env_filter) if !env_filter.trim().is_empty() => EnvFilter::try_new(env_filter)
            .map_err(|e| Error::Config(format!("Invalid RUST_LOG filter: {}", e)))?,
        _ => build_filter(&config)?,
    };

    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(config.display_target)
                    .with_span_events(span_events)
                    .with_writer(io::stdout),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(config.enable_spans)
                    .with_span_list(config.enable_spans)
                    .with_target(config.display_target)
                    .with_writer(io::stdout),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(config.display_target)
                    .with_span_events(span_events)
                    .with_writer(io::stdout),
            )
            .try_init(),
    };

    installed.map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    EnvFilter::try_new(filter_directives(config))
        .map_err(|e| Error::Config(format!("Invalid log filter: {}", e)))
}

/// Directive string used when `RUST_LOG` is not set.
pub fn filter_directives(config: &LoggingConfig) -> String {
    if let Some(custom_filter) = &config.filter {
        return custom_filter.clone();
    }

    let level = config.level.as_str();
    let mut directives: Vec<String> = WORKSPACE_CRATES
        .iter()
        .map(|krate| format!("{}={}", krate, level))
        .collect();
    directives.extend(
        ["h2=warn", "hyper=warn", "reqwest=warn", "sqlx=warn"]
            .iter()
            .map(|d| d.to_string()),
    );
    directives.join(",")
}

/// Replace the value of credential-bearing fields before they reach a log line.
pub fn redact_if_sensitive(field_name: &str, value: &str) -> String {
    let lowered = field_name.to_ascii_lowercase();
    if ["password", "secret", "token", "authorization"]
        .iter()
        .any(|needle| lowered.contains(needle))
        && !lowered.contains("change_token")
    {
        "[REDACTED]".to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_builder() {
        let config = LoggingConfig::default()
            .with_format(LogFormat::Json)
            .with_level(LogLevel::Debug)
            .with_spans(true)
            .with_target(false);

        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, LogLevel::Debug);
        assert!(config.enable_spans);
        assert!(!config.display_target);
    }

    #[test]
    fn test_default_filter_covers_workspace_crates() {
        let config = LoggingConfig::default().with_level(LogLevel::Debug);
        let directives = filter_directives(&config);

        assert!(directives.contains("core_sync=debug"));
        assert!(directives.contains("provider_cmis=debug"));
        assert!(directives.contains("sqlx=warn"));
        assert!(build_filter(&config).is_ok());
    }

    #[test]
    fn test_custom_filter_wins() {
        let config = LoggingConfig::default().with_filter("core_sync=trace");
        assert_eq!(filter_directives(&config), "core_sync=trace");
    }

    #[test]
    fn test_invalid_filter_is_config_error() {
        let config = LoggingConfig::default().with_filter("core_sync=loudest");
        assert!(matches!(build_filter(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_redact_if_sensitive() {
        assert_eq!(redact_if_sensitive("password", "hunter2"), "[REDACTED]");
        assert_eq!(redact_if_sensitive("Authorization", "Basic x"), "[REDACTED]");
        assert_eq!(redact_if_sensitive("change_token", "T7"), "T7");
        assert_eq!(redact_if_sensitive("path", "/docs"), "/docs");
    }
}
