use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error as StdError;

/// Log levels understood by the facade, ordered by priority.
///
/// Lower rank = higher priority. A threshold level accepts a record
/// when the record's rank is less than or equal to the threshold's
/// rank, so `Warning` lets `Critical`/`Error`/`Warning` through and
/// drops everything below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LogLevel {
    #[serde(rename = "crit")]
    Critical,
    Error,
    Warning,
    Info,
    Debug,
    Security,
    Audit,
    Event,
    Request,
    Dependency,
    PageView,
}

impl LogLevel {
    /// Numeric priority rank used for threshold filtering.
    pub fn rank(self) -> u8 {
        match self {
            LogLevel::Critical => 0,
            LogLevel::Error => 1,
            LogLevel::Warning => 2,
            LogLevel::Info => 3,
            LogLevel::Debug => 4,
            LogLevel::Security => 5,
            LogLevel::Audit => 6,
            LogLevel::Event => 7,
            LogLevel::Request => 8,
            LogLevel::Dependency => 9,
            LogLevel::PageView => 10,
        }
    }

    /// Whether a threshold set to `self` accepts a record at `level`.
    pub fn accepts(self, level: LogLevel) -> bool {
        level.rank() <= self.rank()
    }

    /// Wire/console name of the level.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Critical => "crit",
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Security => "security",
            LogLevel::Audit => "audit",
            LogLevel::Event => "event",
            LogLevel::Request => "request",
            LogLevel::Dependency => "dependency",
            LogLevel::PageView => "pageView",
        }
    }

    /// Parse a configured level name. Accepts the wire names plus the
    /// common aliases (`critical`, `warn`, `pageview`).
    pub fn from_name(name: &str) -> Option<LogLevel> {
        match name.trim().to_ascii_lowercase().as_str() {
            "crit" | "critical" => Some(LogLevel::Critical),
            "error" => Some(LogLevel::Error),
            "warning" | "warn" => Some(LogLevel::Warning),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "security" => Some(LogLevel::Security),
            "audit" => Some(LogLevel::Audit),
            "event" => Some(LogLevel::Event),
            "request" => Some(LogLevel::Request),
            "dependency" => Some(LogLevel::Dependency),
            "pageview" => Some(LogLevel::PageView),
            _ => None,
        }
    }
}

/// Captured view of an error being logged.
///
/// Built from any `std::error::Error`; the source chain is rendered
/// into `stack` so the backend gets something resembling a stack trace
/// even though Rust errors don't carry one natively. When the error
/// downcasts to [`HttpFailure`] the HTTP status and response body are
/// lifted out so the facade can surface them as top-level properties.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<serde_json::Value>,
}

impl ErrorInfo {
    pub fn from_error(error: &(dyn StdError + 'static)) -> Self {
        let mut frames = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            frames.push(format!("caused by: {}", cause));
            source = cause.source();
        }

        let (http_status, response_body) = match error.downcast_ref::<HttpFailure>() {
            Some(failure) => (Some(failure.status), failure.body.clone()),
            None => (None, None),
        };

        ErrorInfo {
            message: error.to_string(),
            stack: if frames.is_empty() {
                None
            } else {
                Some(frames.join("\n"))
            },
            http_status,
            response_body,
        }
    }
}

/// Failed HTTP call as reported by an application's own client code.
///
/// Services construct this when a downstream call comes back with a
/// non-success status; `Logger::error` recognizes it and copies the
/// status and body into the emitted property bag.
#[derive(Debug, Clone, thiserror::Error)]
#[error("http request failed with status {status}")]
pub struct HttpFailure {
    pub status: u16,
    pub body: Option<serde_json::Value>,
}

impl HttpFailure {
    pub fn new(status: u16, body: Option<serde_json::Value>) -> Self {
        HttpFailure { status, body }
    }
}

/// Kind-specific payload of a [`LogRecord`].
///
/// Matched exhaustively by the telemetry adapter so an unhandled kind
/// is a compile error, not a silent fall-through to the trace path.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RecordKind {
    Trace,
    Exception {
        error: ErrorInfo,
    },
    Event {
        name: String,
    },
    Dependency {
        dependency_type: String,
        name: String,
        data: String,
        duration_ms: f64,
        result_code: String,
        success: bool,
    },
    Request {
        name: String,
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        duration_ms: f64,
        result_code: String,
        success: bool,
    },
    PageView {
        name: String,
    },
}

/// One normalized record flowing from the [`crate::logger::Logger`]
/// facade to the configured sinks.
///
/// Built synchronously inside a single log call, handed to every sink
/// in registration order, then dropped; never mutated after dispatch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub project_name: String,
    pub component_name: String,
    /// Correlation id resolved from the invocation's trace header.
    /// Empty string when unresolved under the strict policy, never a
    /// missing value.
    pub operation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sb_operation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sb_parent_id: Option<String>,
    #[serde(flatten)]
    pub kind: RecordKind,
    /// Open extension bag of caller-supplied properties. Passed through
    /// to sinks unmodified.
    pub properties: BTreeMap<String, serde_json::Value>,
}
