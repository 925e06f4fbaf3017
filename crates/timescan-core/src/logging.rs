//! Tracing subscriber setup.
//!
//! Every scan, calibration and jitter run reports through `tracing`; this
//! module installs the global subscriber once per process. `RUST_LOG`
//! overrides the configured level when set.
//!
//! ```no_run
//! use timescan_core::{logging, settings::Settings};
//!
//! let settings = Settings::load()?;
//! logging::init_from_settings(&settings)?;
//! tracing::info!(target_delay = 0.0005, "moving laser");
//! # Ok::<(), timescan_core::error::TimescanError>(())
//! ```

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::error::{TimescanError, TsResult};
use crate::settings::Settings;

/// Log line layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, coloured (interactive use)
    Pretty,
    /// Single line, no colour (control-room consoles)
    Compact,
    /// One JSON object per event (log shipping)
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = TimescanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(TimescanError::Settings(format!(
                "Invalid log format '{}'. Must be one of: pretty, compact, json",
                s
            ))),
        }
    }
}

/// Subscriber options
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Output layout
    pub format: OutputFormat,
    /// Emit span open/close events
    pub with_span_events: bool,
    /// Include source file and line
    pub with_file_and_line: bool,
    /// Colour output (pretty format only)
    pub with_ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_span_events: false,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Build from the `[logging]` settings section.
    pub fn from_settings(settings: &Settings) -> TsResult<Self> {
        let logging = &settings.logging;
        Ok(Self {
            level: parse_log_level(&logging.level)?,
            format: logging.format.parse()?,
            with_span_events: logging.span_events,
            with_file_and_line: logging.file_and_line,
            with_ansi: logging.ansi,
        })
    }
}

/// Install the subscriber described by `settings`.
pub fn init_from_settings(settings: &Settings) -> TsResult<()> {
    init(LoggingConfig::from_settings(settings)?)
}

/// Install the global subscriber.
///
/// Idempotent: a second call (tests, embedding) returns `Ok(())`.
pub fn init(config: LoggingConfig) -> TsResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = fmt::layer()
        .with_span_events(span_events)
        .with_file(config.with_file_and_line)
        .with_line_number(config.with_file_and_line)
        .with_target(true);

    let layer = match config.format {
        OutputFormat::Pretty => layer.pretty().with_ansi(config.with_ansi).with_filter(env_filter).boxed(),
        OutputFormat::Compact => layer.compact().with_ansi(false).with_filter(env_filter).boxed(),
        OutputFormat::Json => layer.json().with_filter(env_filter).boxed(),
    };

    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(TimescanError::Settings(format!("Failed to initialize tracing: {}", e))),
    }
}

fn parse_log_level(level: &str) -> TsResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(TimescanError::Settings(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert_eq!(parse_log_level("Debug").unwrap(), Level::DEBUG);
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("Compact".parse::<OutputFormat>().unwrap(), OutputFormat::Compact);
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_from_settings() {
        let mut settings = Settings::default();
        settings.logging.level = "debug".into();
        settings.logging.format = "json".into();

        settings.logging.span_events = true;
        settings.logging.ansi = false;

        let config = LoggingConfig::from_settings(&settings).unwrap();
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, OutputFormat::Json);
        assert!(config.with_span_events);
        assert!(!config.with_file_and_line);
        assert!(!config.with_ansi);
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig {
            level: Level::WARN,
            format: OutputFormat::Compact,
            ..Default::default()
        };
        assert!(init(config.clone()).is_ok());
        assert!(init(config).is_ok());
    }
}
