use crate::config::{Config, ConfigError};
use crate::processors;
use crate::record::{LogLevel, LogRecord, RecordKind};
use crate::sink::LogSink;
use crate::telemetry::{
    DependencyTelemetry, EventTelemetry, ExceptionTelemetry, PageViewTelemetry, RequestTelemetry,
    Severity, TagOverrides, TelemetryChannel, TelemetryClient, TelemetryConfig, TraceTelemetry,
    OPERATION_ID_TAG, OPERATION_PARENT_ID_TAG,
};
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::sync::Arc;

// The backend client is process-wide shared state; the first adapter
// construction initializes it and later adapters reuse it, so the
// cloud role reflects the first component constructed in the process.
static SHARED_CLIENT: OnceCell<Arc<TelemetryClient>> = OnceCell::new();

/// Sink translating each [`LogRecord`] into exactly one backend call.
pub struct TelemetryAdapter {
    channel: Arc<dyn TelemetryChannel>,
}

impl TelemetryAdapter {
    /// Build the adapter on the process-wide [`TelemetryClient`],
    /// initializing it on first use with both telemetry processors
    /// registered and the spool directory taken from the config.
    pub fn new(config: &Config, component_name: &str) -> Result<Self, ConfigError> {
        let connection_string = config
            .connection_string
            .clone()
            .ok_or(ConfigError::MissingConnectionString)?;

        let channel = SHARED_CLIENT
            .get_or_try_init(|| {
                let mut telemetry_config =
                    TelemetryConfig::new(connection_string, component_name.to_string());
                telemetry_config.spool_dir = config.file_sink_dir.clone();
                let (client, _handle) = TelemetryClient::spawn(
                    telemetry_config,
                    vec![
                        processors::drop_aad_noise,
                        processors::obfuscate_dependency_urls,
                    ],
                )?;
                Ok::<_, ConfigError>(client)
            })?
            .clone();

        Ok(TelemetryAdapter { channel })
    }

    /// Build the adapter on an explicit channel. Used by tests and by
    /// hosts that manage the client themselves.
    pub fn with_channel(channel: Arc<dyn TelemetryChannel>) -> Self {
        TelemetryAdapter { channel }
    }
}

impl LogSink for TelemetryAdapter {
    fn handle(&self, record: &LogRecord) {
        let tags = tag_overrides(record);
        match &record.kind {
            RecordKind::Trace => self.channel.track_trace(
                TraceTelemetry {
                    message: record.message.clone(),
                    severity: trace_severity(record.level),
                    properties: trace_properties(record),
                },
                tags,
            ),
            RecordKind::Exception { error } => {
                let mut properties = stripped_properties(record);
                attach_message(&mut properties, &record.message);
                self.channel.track_exception(
                    ExceptionTelemetry {
                        error: error.clone(),
                        severity: Severity::Error,
                        properties,
                    },
                    tags,
                );
            }
            RecordKind::Event { name } => {
                let mut properties = stripped_properties(record);
                attach_message(&mut properties, &record.message);
                self.channel.track_event(
                    EventTelemetry {
                        name: name.clone(),
                        properties,
                    },
                    tags,
                );
            }
            RecordKind::Dependency {
                dependency_type,
                name,
                data,
                duration_ms,
                result_code,
                success,
            } => self.channel.track_dependency(
                DependencyTelemetry {
                    dependency_type: dependency_type.clone(),
                    name: name.clone(),
                    data: data.clone(),
                    duration_ms: *duration_ms,
                    result_code: result_code.clone(),
                    success: *success,
                    properties: verbatim_properties(record),
                },
                tags,
            ),
            RecordKind::Request {
                name,
                url,
                source,
                duration_ms,
                result_code,
                success,
            } => self.channel.track_request(
                RequestTelemetry {
                    name: name.clone(),
                    url: url.clone(),
                    source: source.clone(),
                    duration_ms: *duration_ms,
                    result_code: result_code.clone(),
                    success: *success,
                    properties: verbatim_properties(record),
                },
                tags,
            ),
            RecordKind::PageView { name } => self.channel.track_page_view(
                PageViewTelemetry {
                    name: name.clone(),
                    properties: verbatim_properties(record),
                },
                tags,
            ),
        }
    }
}

/// Fixed level-to-severity table for trace telemetry.
pub(crate) fn trace_severity(level: LogLevel) -> Severity {
    match level {
        LogLevel::Critical => Severity::Critical,
        LogLevel::Error => Severity::Error,
        LogLevel::Warning => Severity::Warning,
        LogLevel::Info => Severity::Information,
        LogLevel::Debug => Severity::Verbose,
        LogLevel::Audit => Severity::Verbose,
        LogLevel::Security => Severity::Information,
        // These kinds are routed to their own track calls; a record
        // carrying one of these levels with a Trace kind still gets a
        // defined severity.
        LogLevel::Event | LogLevel::Request | LogLevel::Dependency | LogLevel::PageView => {
            Severity::Information
        }
    }
}

fn tag_overrides(record: &LogRecord) -> TagOverrides {
    let mut tags = TagOverrides::new();
    let operation_id = if record.operation_id.is_empty() {
        record.sb_operation_id.clone()
    } else {
        Some(record.operation_id.clone())
    };
    if let Some(id) = operation_id {
        tags.insert(OPERATION_ID_TAG.to_string(), id);
    }
    if let Some(parent_id) = &record.sb_parent_id {
        tags.insert(OPERATION_PARENT_ID_TAG.to_string(), parent_id.clone());
    }
    tags
}

// Caller properties minus the reserved keys, plus the identity fields.
// Identity is inserted last so callers can never override it.
fn stripped_properties(record: &LogRecord) -> BTreeMap<String, serde_json::Value> {
    let mut properties = record.properties.clone();
    properties.remove("message");
    properties.remove("meta");
    properties.remove("operationId");
    insert_identity(&mut properties, record);
    properties
}

fn trace_properties(record: &LogRecord) -> BTreeMap<String, serde_json::Value> {
    let mut properties = stripped_properties(record);
    properties.insert(
        "level".to_string(),
        serde_json::Value::String(record.level.as_str().to_string()),
    );
    properties
}

// Dependency/request/page-view payloads are forwarded near-verbatim:
// no message/meta stripping, identity still attached.
fn verbatim_properties(record: &LogRecord) -> BTreeMap<String, serde_json::Value> {
    let mut properties = record.properties.clone();
    insert_identity(&mut properties, record);
    properties
}

fn insert_identity(properties: &mut BTreeMap<String, serde_json::Value>, record: &LogRecord) {
    properties.insert(
        "projectName".to_string(),
        serde_json::Value::String(record.project_name.clone()),
    );
    properties.insert(
        "componentName".to_string(),
        serde_json::Value::String(record.component_name.clone()),
    );
    if let Some(id) = &record.sb_operation_id {
        properties.insert(
            "sbOperationId".to_string(),
            serde_json::Value::String(id.clone()),
        );
    }
    if let Some(id) = &record.sb_parent_id {
        properties.insert(
            "sbParentId".to_string(),
            serde_json::Value::String(id.clone()),
        );
    }
}

fn attach_message(properties: &mut BTreeMap<String, serde_json::Value>, message: &str) {
    if !message.trim().is_empty() {
        properties.insert(
            "message".to_string(),
            serde_json::Value::String(message.to_string()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_sink::{InMemoryChannel, TrackedCall};
    use crate::record::ErrorInfo;
    use chrono::Utc;
    use serde_json::json;

    fn record(level: LogLevel, kind: RecordKind) -> LogRecord {
        LogRecord {
            timestamp: Utc::now(),
            level,
            message: String::new(),
            project_name: "demo-project".to_string(),
            component_name: "worker".to_string(),
            operation_id: String::new(),
            sb_operation_id: None,
            sb_parent_id: None,
            kind,
            properties: BTreeMap::new(),
        }
    }

    fn adapter() -> (Arc<InMemoryChannel>, TelemetryAdapter) {
        let channel = Arc::new(InMemoryChannel::new());
        let adapter = TelemetryAdapter::with_channel(channel.clone());
        (channel, adapter)
    }

    #[test]
    fn trace_properties_exclude_reserved_keys_and_keep_the_rest() {
        let (channel, adapter) = adapter();
        let mut r = record(LogLevel::Info, RecordKind::Trace);
        r.message = "a trace".to_string();
        r.properties.insert("message".to_string(), json!("smuggled"));
        r.properties.insert("meta".to_string(), json!({"a": 1}));
        r.properties
            .insert("operationId".to_string(), json!("smuggled-id"));
        r.properties.insert("requestId".to_string(), json!("abc"));
        r.properties.insert("attempt".to_string(), json!(3));

        adapter.handle(&r);

        let calls = channel.calls();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            TrackedCall::Trace { telemetry, .. } => {
                assert_eq!(telemetry.message, "a trace");
                assert_eq!(telemetry.severity, Severity::Information);
                assert!(!telemetry.properties.contains_key("message"));
                assert!(!telemetry.properties.contains_key("meta"));
                assert!(!telemetry.properties.contains_key("operationId"));
                assert_eq!(telemetry.properties.get("requestId"), Some(&json!("abc")));
                assert_eq!(telemetry.properties.get("attempt"), Some(&json!(3)));
                assert_eq!(
                    telemetry.properties.get("projectName"),
                    Some(&json!("demo-project"))
                );
                assert_eq!(telemetry.properties.get("level"), Some(&json!("info")));
            }
            other => panic!("expected trace call, got {:?}", other),
        }
    }

    #[test]
    fn severity_table_matches_the_backend_contract() {
        assert_eq!(trace_severity(LogLevel::Critical), Severity::Critical);
        assert_eq!(trace_severity(LogLevel::Error), Severity::Error);
        assert_eq!(trace_severity(LogLevel::Warning), Severity::Warning);
        assert_eq!(trace_severity(LogLevel::Info), Severity::Information);
        assert_eq!(trace_severity(LogLevel::Debug), Severity::Verbose);
        assert_eq!(trace_severity(LogLevel::Audit), Severity::Verbose);
        assert_eq!(trace_severity(LogLevel::Security), Severity::Information);
    }

    #[test]
    fn blank_exception_message_never_reaches_the_property_bag() {
        let (channel, adapter) = adapter();
        let mut r = record(
            LogLevel::Error,
            RecordKind::Exception {
                error: ErrorInfo {
                    message: "boom".to_string(),
                    stack: None,
                    http_status: None,
                    response_body: None,
                },
            },
        );
        r.message = "   ".to_string();
        adapter.handle(&r);

        match &channel.calls()[0] {
            TrackedCall::Exception { telemetry, .. } => {
                assert_eq!(telemetry.severity, Severity::Error);
                assert_eq!(telemetry.error.message, "boom");
                assert!(!telemetry.properties.contains_key("message"));
            }
            other => panic!("expected exception call, got {:?}", other),
        }
    }

    #[test]
    fn non_blank_event_message_is_attached_verbatim() {
        let (channel, adapter) = adapter();
        let mut r = record(
            LogLevel::Event,
            RecordKind::Event {
                name: "user-signed-in".to_string(),
            },
        );
        r.message = "first login".to_string();
        adapter.handle(&r);

        match &channel.calls()[0] {
            TrackedCall::Event { telemetry, .. } => {
                assert_eq!(telemetry.name, "user-signed-in");
                assert_eq!(
                    telemetry.properties.get("message"),
                    Some(&json!("first login"))
                );
            }
            other => panic!("expected event call, got {:?}", other),
        }
    }

    #[test]
    fn dependency_records_forward_without_stripping() {
        let (channel, adapter) = adapter();
        let mut r = record(
            LogLevel::Dependency,
            RecordKind::Dependency {
                dependency_type: "HTTP".to_string(),
                name: "GET /api/address".to_string(),
                data: "http://host/api/address".to_string(),
                duration_ms: 42.0,
                result_code: "200".to_string(),
                success: true,
            },
        );
        r.properties.insert("meta".to_string(), json!("kept"));
        adapter.handle(&r);

        match &channel.calls()[0] {
            TrackedCall::Dependency { telemetry, .. } => {
                assert_eq!(telemetry.duration_ms, 42.0);
                assert_eq!(telemetry.result_code, "200");
                // Near-verbatim forwarding: no message/meta stripping.
                assert_eq!(telemetry.properties.get("meta"), Some(&json!("kept")));
            }
            other => panic!("expected dependency call, got {:?}", other),
        }
    }

    #[test]
    fn tag_overrides_prefer_the_resolved_operation_id() {
        let (channel, adapter) = adapter();
        let mut r = record(LogLevel::Info, RecordKind::Trace);
        r.operation_id = "763230142f4317478bf6bdcee3886ef0".to_string();
        r.sb_parent_id = Some("2839ff750bf4cc46".to_string());
        adapter.handle(&r);

        match &channel.calls()[0] {
            TrackedCall::Trace { tags, .. } => {
                assert_eq!(
                    tags.get(OPERATION_ID_TAG).map(String::as_str),
                    Some("763230142f4317478bf6bdcee3886ef0")
                );
                assert_eq!(
                    tags.get(OPERATION_PARENT_ID_TAG).map(String::as_str),
                    Some("2839ff750bf4cc46")
                );
            }
            other => panic!("expected trace call, got {:?}", other),
        }
    }

    #[test]
    fn service_bus_id_fills_in_when_no_header_id_was_resolved() {
        let (channel, adapter) = adapter();
        let mut r = record(LogLevel::Info, RecordKind::Trace);
        r.sb_operation_id = Some("sb-operation".to_string());
        adapter.handle(&r);

        match &channel.calls()[0] {
            TrackedCall::Trace { tags, .. } => {
                assert_eq!(
                    tags.get(OPERATION_ID_TAG).map(String::as_str),
                    Some("sb-operation")
                );
            }
            other => panic!("expected trace call, got {:?}", other),
        }
    }
}
