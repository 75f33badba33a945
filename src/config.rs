use crate::record::LogLevel;
use crate::telemetry::TelemetryError;
use std::path::PathBuf;

/// Environment variable names used to configure the facade. Read once
/// at process start via [`Config::from_env`]; the core types stay
/// decoupled from environment access.
///
/// Log level threshold, matched against a level name (`crit`, `error`,
/// `warning`, `info`, `debug`, `security`, `audit`, `event`,
/// `request`, `dependency`, `pageview`).
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// Telemetry backend connection string
/// (`InstrumentationKey=...;IngestionEndpoint=...`), or a bare
/// instrumentation key. Required outside development mode.
pub const CONNECTION_STRING_ENV: &str = "APPINSIGHTS_CONNECTION_STRING";

/// Set to `development` to run with console-only guarantees and make
/// the telemetry backend optional.
pub const APP_ENV_ENV: &str = "APP_ENV";

/// Pretty-print structured metadata on the console sink.
pub const PRETTY_PRINT_ENV: &str = "LOG_PRETTY_PRINT";

/// Include the structured metadata object in console lines.
pub const CONSOLE_META_ENV: &str = "LOG_CONSOLE_META";

/// Directory for the optional file sink and the export spool. Unset
/// disables both.
pub const FILE_SINK_ENV: &str = "LOG_FILE_SINK";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

/// Process-wide facade configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Threshold level; records below it are dropped by the facade.
    pub level: LogLevel,
    pub connection_string: Option<String>,
    pub development_mode: bool,
    pub pretty_print: bool,
    pub console_meta: bool,
    pub file_sink_dir: Option<PathBuf>,
}

impl Config {
    /// Build a configuration from the process environment.
    ///
    /// Unknown level names fall back to `info`. Missing credentials are
    /// not an error here; [`crate::logger::Logger::new`] fails fast on
    /// them when the mode requires the backend.
    pub fn from_env() -> Self {
        let level = LogLevel::from_name(&env_or(LOG_LEVEL_ENV, "info")).unwrap_or(LogLevel::Info);
        let connection_string = std::env::var(CONNECTION_STRING_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty());
        let development_mode = env_or(APP_ENV_ENV, "") == "development";
        let file_sink_dir = std::env::var(FILE_SINK_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Config {
            level,
            connection_string,
            development_mode,
            pretty_print: env_flag(PRETTY_PRINT_ENV, false),
            console_meta: env_flag(CONSOLE_META_ENV, true),
            file_sink_dir,
        }
    }

    /// Development-mode configuration with no backend, for local runs
    /// and tests.
    pub fn development(level: LogLevel) -> Self {
        Config {
            level,
            connection_string: None,
            development_mode: true,
            pretty_print: false,
            console_meta: true,
            file_sink_dir: None,
        }
    }
}

/// Fatal configuration error raised at `Logger` construction, before
/// any log call is possible.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("telemetry connection string is required outside development mode (set {CONNECTION_STRING_ENV})")]
    MissingConnectionString,

    #[error("telemetry backend initialization failed: {0}")]
    Backend(#[from] TelemetryError),
}
