//! Logging initialization.
//!
//! Installs a `tracing-subscriber` that writes to stderr, so stdout stays
//! free for command output. The filter comes from `RUST_LOG` when set and
//! from the given level otherwise.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable selecting the output format (`compact` or `json`).
pub const ENV_LOG_FORMAT: &str = "HASS_WS_LOG_FORMAT";

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable single lines.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parse a format name; anything unrecognised is compact.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" | "jsonl" => Self::Json,
            _ => Self::Compact,
        }
    }

    fn from_env() -> Self {
        std::env::var(ENV_LOG_FORMAT)
            .map(|raw| Self::parse(&raw))
            .unwrap_or_default()
    }
}

/// Initialize the logging system.
///
/// # Arguments
///
/// * `level` - Default log level (trace, debug, info, warn, error). Unknown
///   names fall back to info.
///
/// # Example
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("Connected");
/// ```
pub fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // A subscriber may already be installed (tests, embedding programs)
    let _ = match LogFormat::from_env() {
        LogFormat::Json => builder.json().finish().try_init(),
        LogFormat::Compact => builder.compact().finish().try_init(),
    };
}

fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::default().add_directive(LevelFilter::from_level(parse_level(level)).into())
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_variants() {
        assert_eq!(parse_level("trace"), tracing::Level::TRACE);
        assert_eq!(parse_level("DEBUG"), tracing::Level::DEBUG);
        assert_eq!(parse_level("Warning"), tracing::Level::WARN);
        assert_eq!(parse_level("error"), tracing::Level::ERROR);
    }

    #[test]
    fn test_parse_level_unknown_defaults_to_info() {
        assert_eq!(parse_level(""), tracing::Level::INFO);
        assert_eq!(parse_level("verbose"), tracing::Level::INFO);
    }

    #[test]
    fn test_default_filter_uses_parsed_level() {
        assert!(default_filter("Warning").to_string().eq_ignore_ascii_case("warn"));
        assert!(default_filter("verbose").to_string().eq_ignore_ascii_case("info"));
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" JSONL "), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Compact);
        assert_eq!(LogFormat::default(), LogFormat::Compact);
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        init_logging("debug");
        init_logging("info");
        tracing::info!("logging initialized");
    }
}
