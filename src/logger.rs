use crate::adapter::TelemetryAdapter;
use crate::config::{Config, ConfigError};
use crate::console::ConsoleSink;
use crate::context::InvocationContext;
use crate::file_sink::FileSink;
use crate::operation_id::{self, OperationIdPolicy};
use crate::record::{ErrorInfo, LogLevel, LogRecord, RecordKind};
use crate::service_bus;
use crate::sink::LogSink;
use chrono::Utc;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::sync::Arc;

/// Reserved property keys lifted out of the bag into typed record
/// fields by `dependency`/`request`.
pub const DEPENDENCY_TYPE_KEY: &str = "dependencyType";
pub const DURATION_MS_KEY: &str = "durationMs";
pub const RESULT_CODE_KEY: &str = "resultCode";
pub const SUCCESS_KEY: &str = "success";
pub const TARGET_URL_KEY: &str = "url";
pub const SOURCE_KEY: &str = "source";

/// Caller-supplied properties for one log call.
///
/// The optional invocation context rides alongside the value bag; the
/// facade consumes it to resolve correlation ids and it never reaches
/// a sink.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    values: BTreeMap<String, serde_json::Value>,
    context: Option<InvocationContext>,
}

impl Properties {
    pub fn new() -> Self {
        Properties::default()
    }

    pub fn insert(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn with_context(mut self, context: InvocationContext) -> Self {
        self.context = Some(context);
        self
    }
}

impl From<BTreeMap<String, serde_json::Value>> for Properties {
    fn from(values: BTreeMap<String, serde_json::Value>) -> Self {
        Properties {
            values,
            context: None,
        }
    }
}

/// The public logging facade.
///
/// One instance per component, created once at process start and kept
/// for the process lifetime. Each call normalizes its arguments into a
/// [`LogRecord`] decorated with the immutable project/component
/// identity and the resolved correlation ids, then dispatches it
/// synchronously to every configured sink in registration order.
pub struct Logger {
    project_name: String,
    component_name: String,
    level: LogLevel,
    policy: OperationIdPolicy,
    sinks: Vec<Arc<dyn LogSink>>,
}

impl Logger {
    /// Build a logger with the standard sink set: console always, the
    /// optional daily file sink, and the telemetry adapter.
    ///
    /// Outside development mode a missing connection string is a fatal
    /// configuration error, raised here before any log call is
    /// possible. In development mode the adapter is only attached when
    /// a connection string is configured.
    pub fn new(
        project_name: impl Into<String>,
        component_name: impl Into<String>,
        config: &Config,
    ) -> Result<Self, ConfigError> {
        let project_name = project_name.into();
        let component_name = component_name.into();

        let mut sinks: Vec<Arc<dyn LogSink>> = vec![Arc::new(ConsoleSink::new(config))];

        if let Some(dir) = &config.file_sink_dir {
            match FileSink::open(dir, &project_name) {
                Ok(file_sink) => sinks.push(Arc::new(file_sink)),
                Err(error) => {
                    tracing::warn!(%error, "file sink disabled, continuing with console only")
                }
            }
        }

        if config.development_mode {
            if config.connection_string.is_some() {
                sinks.push(Arc::new(TelemetryAdapter::new(config, &component_name)?));
            }
        } else {
            sinks.push(Arc::new(TelemetryAdapter::new(config, &component_name)?));
        }

        Ok(Logger {
            project_name,
            component_name,
            level: config.level,
            policy: OperationIdPolicy::Strict,
            sinks,
        })
    }

    /// Build a logger over an explicit sink list. Used by tests and by
    /// hosts with custom sink arrangements.
    pub fn with_sinks(
        project_name: impl Into<String>,
        component_name: impl Into<String>,
        level: LogLevel,
        sinks: Vec<Arc<dyn LogSink>>,
    ) -> Self {
        Logger {
            project_name: project_name.into(),
            component_name: component_name.into(),
            level,
            policy: OperationIdPolicy::Strict,
            sinks,
        }
    }

    /// Switch the missing-trace-header policy. A logger holds exactly
    /// one policy for its lifetime; the default is strict.
    pub fn with_policy(mut self, policy: OperationIdPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn component_name(&self) -> &str {
        &self.component_name
    }

    pub fn critical(&self, message: &str, properties: Option<Properties>) {
        self.trace(LogLevel::Critical, message, properties);
    }

    /// Log an error as exception telemetry.
    ///
    /// When `error` is an [`crate::record::HttpFailure`], the response
    /// body and HTTP status are lifted into top-level `response` /
    /// `httpStatus` properties.
    pub fn error(
        &self,
        error: &(dyn StdError + 'static),
        message: Option<&str>,
        properties: Option<Properties>,
    ) {
        let info = ErrorInfo::from_error(error);
        let mut properties = properties.unwrap_or_default();
        if let Some(status) = info.http_status {
            properties.values.insert(
                "httpStatus".to_string(),
                serde_json::Value::from(status),
            );
        }
        if let Some(body) = &info.response_body {
            properties
                .values
                .insert("response".to_string(), body.clone());
        }

        let record = self.build(
            LogLevel::Error,
            message.unwrap_or(""),
            Some(properties),
            RecordKind::Exception { error: info },
        );
        self.dispatch(record);
    }

    pub fn warn(&self, message: &str, properties: Option<Properties>) {
        self.trace(LogLevel::Warning, message, properties);
    }

    pub fn info(&self, message: &str, properties: Option<Properties>) {
        self.trace(LogLevel::Info, message, properties);
    }

    /// Alias for an info-level entry, kept for callers migrating from
    /// `console.log`-style APIs.
    pub fn log(&self, message: &str, properties: Option<Properties>) {
        self.trace(LogLevel::Info, message, properties);
    }

    pub fn debug(&self, message: &str, properties: Option<Properties>) {
        self.trace(LogLevel::Debug, message, properties);
    }

    pub fn audit(&self, message: &str, properties: Option<Properties>) {
        self.trace(LogLevel::Audit, message, properties);
    }

    pub fn security(&self, message: &str, properties: Option<Properties>) {
        self.trace(LogLevel::Security, message, properties);
    }

    /// Emit a custom event. `name` is the event identity; the optional
    /// free-text message is normalized to empty and only surfaces at
    /// the sink when non-blank.
    pub fn event(&self, name: &str, message: Option<&str>, properties: Option<Properties>) {
        let record = self.build(
            LogLevel::Event,
            message.unwrap_or(""),
            properties,
            RecordKind::Event {
                name: name.to_string(),
            },
        );
        self.dispatch(record);
    }

    /// Emit dependency-call telemetry. Call metrics ride in the
    /// properties bag under the reserved keys ([`DURATION_MS_KEY`],
    /// [`RESULT_CODE_KEY`], [`SUCCESS_KEY`], [`DEPENDENCY_TYPE_KEY`])
    /// and are lifted into the typed record.
    pub fn dependency(&self, name: &str, data: Option<&str>, properties: Option<Properties>) {
        let mut properties = properties.unwrap_or_default();
        let name = if name.is_empty() { "Dependency" } else { name };
        let dependency_type = take_string(&mut properties.values, DEPENDENCY_TYPE_KEY)
            .unwrap_or_else(|| "HTTP".to_string());
        let duration_ms = take_f64(&mut properties.values, DURATION_MS_KEY).unwrap_or(0.0);
        let result_code =
            take_string(&mut properties.values, RESULT_CODE_KEY).unwrap_or_else(|| "0".to_string());
        let success = take_bool(&mut properties.values, SUCCESS_KEY).unwrap_or(true);

        let record = self.build(
            LogLevel::Dependency,
            "",
            Some(properties),
            RecordKind::Dependency {
                dependency_type,
                name: name.to_string(),
                data: data.unwrap_or("").to_string(),
                duration_ms,
                result_code,
                success,
            },
        );
        self.dispatch(record);
    }

    /// Emit request telemetry. The request URL and source ride under
    /// [`TARGET_URL_KEY`] / [`SOURCE_KEY`]; metrics as in
    /// [`Logger::dependency`].
    pub fn request(&self, name: &str, properties: Option<Properties>) {
        let mut properties = properties.unwrap_or_default();
        let name = if name.is_empty() { "Request" } else { name };
        let url = take_string(&mut properties.values, TARGET_URL_KEY).unwrap_or_default();
        let source = take_string(&mut properties.values, SOURCE_KEY);
        let duration_ms = take_f64(&mut properties.values, DURATION_MS_KEY).unwrap_or(0.0);
        let result_code =
            take_string(&mut properties.values, RESULT_CODE_KEY).unwrap_or_else(|| "0".to_string());
        let success = take_bool(&mut properties.values, SUCCESS_KEY).unwrap_or(true);

        let record = self.build(
            LogLevel::Request,
            "",
            Some(properties),
            RecordKind::Request {
                name: name.to_string(),
                url,
                source,
                duration_ms,
                result_code,
                success,
            },
        );
        self.dispatch(record);
    }

    pub fn page_view(&self, name: &str, properties: Option<Properties>) {
        let record = self.build(
            LogLevel::PageView,
            "",
            properties,
            RecordKind::PageView {
                name: name.to_string(),
            },
        );
        self.dispatch(record);
    }

    fn trace(&self, level: LogLevel, message: &str, properties: Option<Properties>) {
        let record = self.build(level, message, properties, RecordKind::Trace);
        self.dispatch(record);
    }

    // Merge order is fixed: identity fields first, resolved trace ids
    // second, caller values last. Identity and the resolved ids live as
    // typed fields, so callers cannot override them from the bag.
    fn build(
        &self,
        level: LogLevel,
        message: &str,
        properties: Option<Properties>,
        kind: RecordKind,
    ) -> LogRecord {
        let Properties { values, context } = properties.unwrap_or_default();

        let (operation_id, sb_operation_id, sb_parent_id) = match &context {
            Some(context) => (
                operation_id::resolve(context, self.policy),
                service_bus::get_operation_id(context),
                service_bus::get_parent_id(context),
            ),
            None => (self.policy.fallback(), None, None),
        };

        LogRecord {
            timestamp: Utc::now(),
            level,
            message: message.to_string(),
            project_name: self.project_name.clone(),
            component_name: self.component_name.clone(),
            operation_id,
            sb_operation_id,
            sb_parent_id,
            kind,
            properties: values,
        }
    }

    fn dispatch(&self, record: LogRecord) {
        if !self.level.accepts(record.level) {
            return;
        }
        for sink in &self.sinks {
            sink.handle(&record);
        }
    }
}

fn take_string(values: &mut BTreeMap<String, serde_json::Value>, key: &str) -> Option<String> {
    let value = values.remove(key)?;
    match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        other => {
            values.insert(key.to_string(), other);
            None
        }
    }
}

fn take_f64(values: &mut BTreeMap<String, serde_json::Value>, key: &str) -> Option<f64> {
    let value = values.remove(key)?;
    match value.as_f64() {
        Some(n) => Some(n),
        None => {
            values.insert(key.to_string(), value);
            None
        }
    }
}

fn take_bool(values: &mut BTreeMap<String, serde_json::Value>, key: &str) -> Option<bool> {
    let value = values.remove(key)?;
    match value.as_bool() {
        Some(b) => Some(b),
        None => {
            values.insert(key.to_string(), value);
            None
        }
    }
}
