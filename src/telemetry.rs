use crate::context::InvocationContext;
use crate::file_sink::date_filename;
use crate::operation_id::{new_hex_id, parse_traceparent};
use crate::record::ErrorInfo;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration};

/// Correlation tag keys understood by the backend.
pub const OPERATION_ID_TAG: &str = "ai.operation.id";
pub const OPERATION_PARENT_ID_TAG: &str = "ai.operation.parentId";
pub const OPERATION_NAME_TAG: &str = "ai.operation.name";
pub const CLOUD_ROLE_TAG: &str = "ai.cloud.role";

/// Envelope base types, one per telemetry kind.
pub const MESSAGE_DATA: &str = "MessageData";
pub const EXCEPTION_DATA: &str = "ExceptionData";
pub const EVENT_DATA: &str = "EventData";
pub const REMOTE_DEPENDENCY_DATA: &str = "RemoteDependencyData";
pub const REQUEST_DATA: &str = "RequestData";
pub const PAGE_VIEW_DATA: &str = "PageViewData";

const DEFAULT_INGESTION_ENDPOINT: &str = "https://dc.services.visualstudio.com";
const MAX_EXPORT_ATTEMPTS: u32 = 5;

/// Backend severity, distinct from but mapped from [`crate::record::LogLevel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Verbose = 0,
    Information = 1,
    Warning = 2,
    Error = 3,
    Critical = 4,
}

impl Serialize for Severity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// Correlation tag overrides attached to a single backend call.
pub type TagOverrides = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize)]
pub struct TraceTelemetry {
    pub message: String,
    pub severity: Severity,
    pub properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExceptionTelemetry {
    pub error: ErrorInfo,
    pub severity: Severity,
    pub properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventTelemetry {
    pub name: String,
    pub properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyTelemetry {
    pub dependency_type: String,
    pub name: String,
    pub data: String,
    pub duration_ms: f64,
    pub result_code: String,
    pub success: bool,
    pub properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestTelemetry {
    pub name: String,
    pub url: String,
    pub source: Option<String>,
    pub duration_ms: f64,
    pub result_code: String,
    pub success: bool,
    pub properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageViewTelemetry {
    pub name: String,
    pub properties: BTreeMap<String, serde_json::Value>,
}

/// Flattened payload carried inside an [`Envelope`], inspected and
/// mutated by telemetry processors before export.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Dependency type string, e.g. "HTTP" or "InProc | Microsoft.AAD".
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<ErrorInfo>,
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl From<TraceTelemetry> for BaseData {
    fn from(t: TraceTelemetry) -> Self {
        BaseData {
            message: Some(t.message),
            severity: Some(t.severity),
            properties: t.properties,
            ..BaseData::default()
        }
    }
}

impl From<ExceptionTelemetry> for BaseData {
    fn from(t: ExceptionTelemetry) -> Self {
        BaseData {
            exception: Some(t.error),
            severity: Some(t.severity),
            properties: t.properties,
            ..BaseData::default()
        }
    }
}

impl From<EventTelemetry> for BaseData {
    fn from(t: EventTelemetry) -> Self {
        BaseData {
            name: Some(t.name),
            properties: t.properties,
            ..BaseData::default()
        }
    }
}

impl From<DependencyTelemetry> for BaseData {
    fn from(t: DependencyTelemetry) -> Self {
        BaseData {
            name: Some(t.name),
            data: Some(t.data),
            type_name: Some(t.dependency_type),
            duration_ms: Some(t.duration_ms),
            result_code: Some(t.result_code),
            success: Some(t.success),
            properties: t.properties,
            ..BaseData::default()
        }
    }
}

impl From<RequestTelemetry> for BaseData {
    fn from(t: RequestTelemetry) -> Self {
        BaseData {
            name: Some(t.name),
            url: Some(t.url),
            source: t.source,
            duration_ms: Some(t.duration_ms),
            result_code: Some(t.result_code),
            success: Some(t.success),
            properties: t.properties,
            ..BaseData::default()
        }
    }
}

impl From<PageViewTelemetry> for BaseData {
    fn from(t: PageViewTelemetry) -> Self {
        BaseData {
            name: Some(t.name),
            properties: t.properties,
            ..BaseData::default()
        }
    }
}

/// One exported telemetry item: base payload plus correlation tags.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub time: DateTime<Utc>,
    pub base_type: String,
    pub base: BaseData,
    pub tags: BTreeMap<String, String>,
    pub i_key: String,
}

/// Processor hook evaluated before an envelope is queued for export.
/// Returning `false` drops the envelope; processors may mutate it.
pub type TelemetryProcessor = fn(&mut Envelope) -> bool;

/// Dynamically-scoped correlation context for one handler invocation.
#[derive(Debug, Clone)]
pub struct CorrelationScope {
    pub operation_id: String,
    pub parent_id: Option<String>,
    pub operation_name: String,
}

tokio::task_local! {
    static CURRENT_SCOPE: CorrelationScope;
}

/// Correlation scope active for the current task, if any.
pub fn current_scope() -> Option<CorrelationScope> {
    CURRENT_SCOPE.try_with(Clone::clone).ok()
}

/// Run a future with `scope` installed as the task's correlation
/// scope. Telemetry emitted while the future runs inherits the scope's
/// operation id unless an explicit override is already present.
pub async fn with_scope<F: std::future::Future>(scope: CorrelationScope, future: F) -> F::Output {
    CURRENT_SCOPE.scope(scope, future).await
}

/// Derive the correlation scope for one invocation: trace header ids
/// when present, a freshly generated operation id otherwise.
pub fn derive_scope(context: &InvocationContext, operation_name: &str) -> CorrelationScope {
    let parsed = context
        .trace_context
        .as_ref()
        .and_then(|tc| tc.traceparent.as_deref())
        .and_then(parse_traceparent);

    match parsed {
        Some(traceparent) => CorrelationScope {
            operation_id: traceparent.trace_id,
            parent_id: Some(traceparent.parent_id),
            operation_name: operation_name.to_string(),
        },
        None => CorrelationScope {
            operation_id: new_hex_id(),
            parent_id: None,
            operation_name: operation_name.to_string(),
        },
    }
}

/// Fill missing correlation tags from the task's current scope.
pub fn apply_scope_tags(tags: &mut TagOverrides) {
    if let Some(scope) = current_scope() {
        tags.entry(OPERATION_ID_TAG.to_string())
            .or_insert(scope.operation_id);
        tags.entry(OPERATION_NAME_TAG.to_string())
            .or_insert(scope.operation_name);
        if let Some(parent_id) = scope.parent_id {
            tags.entry(OPERATION_PARENT_ID_TAG.to_string())
                .or_insert(parent_id);
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("malformed telemetry connection string: {0}")]
    BadConnectionString(String),

    #[error("telemetry channel is closed")]
    ChannelClosed,

    #[error("flush acknowledgement was dropped")]
    FlushLost,
}

/// Outbound telemetry backend collaborator.
///
/// One call per record kind, plus the correlation-scope and flush
/// operations the wrappers need. Implemented by [`TelemetryClient`]
/// for production and by
/// [`crate::memory_sink::InMemoryChannel`] for tests.
#[async_trait]
pub trait TelemetryChannel: Send + Sync {
    fn track_trace(&self, telemetry: TraceTelemetry, tags: TagOverrides);
    fn track_exception(&self, telemetry: ExceptionTelemetry, tags: TagOverrides);
    fn track_event(&self, telemetry: EventTelemetry, tags: TagOverrides);
    fn track_dependency(&self, telemetry: DependencyTelemetry, tags: TagOverrides);
    fn track_request(&self, telemetry: RequestTelemetry, tags: TagOverrides);
    fn track_page_view(&self, telemetry: PageViewTelemetry, tags: TagOverrides);

    /// Open a correlation scope for one invocation.
    fn start_operation(
        &self,
        context: &InvocationContext,
        operation_name: &str,
    ) -> CorrelationScope {
        derive_scope(context, operation_name)
    }

    /// Drain buffered telemetry to the backend.
    async fn flush(&self) -> Result<(), TelemetryError>;
}

pub(crate) struct ConnectionSettings {
    pub instrumentation_key: String,
    pub ingestion_endpoint: String,
}

/// Parse `InstrumentationKey=...;IngestionEndpoint=...`. A bare value
/// with no `=` is accepted as a legacy instrumentation key with the
/// default ingestion endpoint.
pub(crate) fn parse_connection_string(raw: &str) -> Result<ConnectionSettings, TelemetryError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(TelemetryError::BadConnectionString(
            "empty connection string".to_string(),
        ));
    }

    if !raw.contains('=') {
        return Ok(ConnectionSettings {
            instrumentation_key: raw.to_string(),
            ingestion_endpoint: DEFAULT_INGESTION_ENDPOINT.to_string(),
        });
    }

    let mut instrumentation_key = None;
    let mut ingestion_endpoint = None;
    for segment in raw.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let (name, value) = segment.split_once('=').ok_or_else(|| {
            TelemetryError::BadConnectionString(format!("segment without '=': {segment}"))
        })?;
        if name.eq_ignore_ascii_case("InstrumentationKey") {
            instrumentation_key = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("IngestionEndpoint") {
            ingestion_endpoint = Some(value.trim_end_matches('/').to_string());
        }
    }

    Ok(ConnectionSettings {
        instrumentation_key: instrumentation_key.ok_or_else(|| {
            TelemetryError::BadConnectionString("missing InstrumentationKey".to_string())
        })?,
        ingestion_endpoint: ingestion_endpoint
            .unwrap_or_else(|| DEFAULT_INGESTION_ENDPOINT.to_string()),
    })
}

/// Configuration for [`TelemetryClient`].
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    pub connection_string: String,
    /// Cloud role reported for every envelope, normally the component
    /// name of the first logger constructed in the process.
    pub cloud_role: String,
    /// Maximum queued envelopes before new ones are dropped.
    pub channel_buffer: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// Directory for the disk spool written when the ingestion endpoint
    /// stays unreachable past the retry budget. `None` disables it.
    pub spool_dir: Option<PathBuf>,
}

impl TelemetryConfig {
    pub fn new(connection_string: impl Into<String>, cloud_role: impl Into<String>) -> Self {
        TelemetryConfig {
            connection_string: connection_string.into(),
            cloud_role: cloud_role.into(),
            channel_buffer: 1024,
            batch_size: 128,
            flush_interval: Duration::from_secs(1),
            spool_dir: None,
        }
    }
}

enum ClientMessage {
    Envelope(Envelope),
    Flush(oneshot::Sender<()>),
}

/// Process-wide telemetry backend client.
///
/// `track_*` calls run the processor chain and enqueue the surviving
/// envelope into a bounded channel; a background task batches and posts
/// queued envelopes to the ingestion endpoint, retrying with backoff
/// and spilling to the disk spool when the endpoint stays down. The
/// caller never blocks on network I/O.
pub struct TelemetryClient {
    sender: mpsc::Sender<ClientMessage>,
    instrumentation_key: String,
    context_tags: BTreeMap<String, String>,
    processors: Vec<TelemetryProcessor>,
    /// Envelopes offered to the client (before processor filtering).
    pub total: AtomicU64,
    /// Successfully enqueued for export.
    pub enqueued: AtomicU64,
    /// Dropped because the channel was full.
    pub dropped: AtomicU64,
}

impl TelemetryClient {
    /// Create a client and spawn its background export task.
    ///
    /// Minimal thresholds are enforced for `channel_buffer`,
    /// `batch_size` and `flush_interval` to avoid degenerate
    /// configurations. Must be called from within a tokio runtime.
    pub fn spawn(
        config: TelemetryConfig,
        processors: Vec<TelemetryProcessor>,
    ) -> Result<(Arc<Self>, JoinHandle<()>), TelemetryError> {
        let settings = parse_connection_string(&config.connection_string)?;

        let buffer = config.channel_buffer.max(16);
        let batch_size = config.batch_size.max(1);
        let flush_interval = if config.flush_interval < Duration::from_millis(10) {
            Duration::from_millis(10)
        } else {
            config.flush_interval
        };

        let (tx, rx) = mpsc::channel::<ClientMessage>(buffer);

        // Only the cloud role is ambient; operation tags come from the
        // correlation scope or per-record overrides.
        let mut context_tags = BTreeMap::new();
        context_tags.insert(CLOUD_ROLE_TAG.to_string(), config.cloud_role.clone());

        let transport = Transport {
            client: reqwest::Client::new(),
            track_url: format!("{}/v2/track", settings.ingestion_endpoint),
        };
        let spool_dir = config.spool_dir.clone();
        let handle = tokio::spawn(export_loop(rx, transport, batch_size, flush_interval, spool_dir));

        let client = Arc::new(TelemetryClient {
            sender: tx,
            instrumentation_key: settings.instrumentation_key,
            context_tags,
            processors,
            total: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        Ok((client, handle))
    }

    fn envelope(&self, base_type: &'static str, base: BaseData, overrides: TagOverrides) -> Envelope {
        let mut tags = self.context_tags.clone();
        tags.extend(overrides);
        apply_scope_tags(&mut tags);
        Envelope {
            time: Utc::now(),
            base_type: base_type.to_string(),
            base,
            tags,
            i_key: self.instrumentation_key.clone(),
        }
    }

    fn submit(&self, mut envelope: Envelope) {
        self.total.fetch_add(1, Ordering::Relaxed);
        for processor in &self.processors {
            if !processor(&mut envelope) {
                return;
            }
        }
        match self.sender.try_send(ClientMessage::Envelope(envelope)) {
            Ok(()) => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("telemetry channel full, dropping envelope");
            }
        }
    }
}

#[async_trait]
impl TelemetryChannel for TelemetryClient {
    fn track_trace(&self, telemetry: TraceTelemetry, tags: TagOverrides) {
        self.submit(self.envelope(MESSAGE_DATA, telemetry.into(), tags));
    }

    fn track_exception(&self, telemetry: ExceptionTelemetry, tags: TagOverrides) {
        self.submit(self.envelope(EXCEPTION_DATA, telemetry.into(), tags));
    }

    fn track_event(&self, telemetry: EventTelemetry, tags: TagOverrides) {
        self.submit(self.envelope(EVENT_DATA, telemetry.into(), tags));
    }

    fn track_dependency(&self, telemetry: DependencyTelemetry, tags: TagOverrides) {
        self.submit(self.envelope(REMOTE_DEPENDENCY_DATA, telemetry.into(), tags));
    }

    fn track_request(&self, telemetry: RequestTelemetry, tags: TagOverrides) {
        self.submit(self.envelope(REQUEST_DATA, telemetry.into(), tags));
    }

    fn track_page_view(&self, telemetry: PageViewTelemetry, tags: TagOverrides) {
        self.submit(self.envelope(PAGE_VIEW_DATA, telemetry.into(), tags));
    }

    async fn flush(&self) -> Result<(), TelemetryError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.sender
            .send(ClientMessage::Flush(ack_tx))
            .await
            .map_err(|_| TelemetryError::ChannelClosed)?;
        ack_rx.await.map_err(|_| TelemetryError::FlushLost)
    }
}

struct Transport {
    client: reqwest::Client,
    track_url: String,
}

impl Transport {
    /// POST a batch as newline-delimited JSON envelopes.
    async fn post(&self, batch: &[Envelope]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut body = String::new();
        for envelope in batch {
            body.push_str(&serde_json::to_string(envelope)?);
            body.push('\n');
        }
        let response = self.client.post(&self.track_url).body(body).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            Err(format!("telemetry ingestion failed with status {}: {}", status, text).into())
        }
    }
}

async fn export_loop(
    mut rx: mpsc::Receiver<ClientMessage>,
    transport: Transport,
    batch_size: usize,
    flush_interval: Duration,
    spool_dir: Option<PathBuf>,
) {
    let mut batch: Vec<Envelope> = Vec::with_capacity(batch_size);
    // A single ticker shared across iterations: a steady trickle of
    // envelopes must not keep deferring the interval flush.
    let mut ticker = interval(flush_interval);

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(ClientMessage::Envelope(envelope)) => {
                    batch.push(envelope);
                    if batch.len() >= batch_size {
                        export_batch(&transport, &mut batch, spool_dir.as_deref()).await;
                    }
                }
                Some(ClientMessage::Flush(ack)) => {
                    export_batch(&transport, &mut batch, spool_dir.as_deref()).await;
                    let _ = ack.send(());
                }
                None => {
                    export_batch(&transport, &mut batch, spool_dir.as_deref()).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    export_batch(&transport, &mut batch, spool_dir.as_deref()).await;
                }
            }
        }
    }
}

async fn export_batch(transport: &Transport, batch: &mut Vec<Envelope>, spool_dir: Option<&std::path::Path>) {
    if batch.is_empty() {
        return;
    }

    let mut backoff = Duration::from_millis(100);
    let max_backoff = Duration::from_secs(10);

    for attempt in 1..=MAX_EXPORT_ATTEMPTS {
        match transport.post(batch).await {
            Ok(()) => {
                batch.clear();
                return;
            }
            Err(error) => {
                tracing::warn!(attempt, %error, "telemetry export failed, retrying in {:?}", backoff);
                sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, max_backoff);
            }
        }
    }

    if let Some(dir) = spool_dir {
        spill_to_spool(dir, batch);
    } else {
        tracing::warn!(count = batch.len(), "telemetry export gave up, discarding batch");
    }
    batch.clear();
}

// Best-effort spill so an unreachable endpoint doesn't lose the batch
// outright. The spool is an operator-readable JSON-lines file per day.
fn spill_to_spool(dir: &std::path::Path, batch: &[Envelope]) {
    let path = dir.join(format!("telemetry-spool-{}.jsonl", date_filename()));
    let result = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut file| {
            for envelope in batch {
                match serde_json::to_string(envelope) {
                    Ok(line) => writeln!(file, "{}", line)?,
                    Err(error) => {
                        tracing::warn!(%error, "skipping unserializable envelope while spooling");
                    }
                }
            }
            Ok(())
        });

    match result {
        Ok(()) => tracing::warn!(count = batch.len(), path = %path.display(), "spooled telemetry batch to disk"),
        Err(error) => tracing::warn!(%error, "failed to spool telemetry batch"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_connection_string() {
        let settings = parse_connection_string(
            "InstrumentationKey=00000000-0000-0000-0000-000000000001;IngestionEndpoint=https://ingest.example.com/",
        )
        .expect("valid connection string");
        assert_eq!(
            settings.instrumentation_key,
            "00000000-0000-0000-0000-000000000001"
        );
        assert_eq!(settings.ingestion_endpoint, "https://ingest.example.com");
    }

    #[test]
    fn bare_value_is_a_legacy_instrumentation_key() {
        let settings =
            parse_connection_string("00000000-0000-0000-0000-000000000001").expect("legacy key");
        assert_eq!(
            settings.instrumentation_key,
            "00000000-0000-0000-0000-000000000001"
        );
        assert_eq!(settings.ingestion_endpoint, DEFAULT_INGESTION_ENDPOINT);
    }

    #[test]
    fn rejects_empty_and_keyless_connection_strings() {
        assert!(parse_connection_string("").is_err());
        assert!(parse_connection_string("IngestionEndpoint=https://x.example.com").is_err());
    }

    #[test]
    fn derive_scope_prefers_trace_header_ids() {
        let context = InvocationContext::new()
            .with_traceparent("00-763230142f4317478bf6bdcee3886ef0-2839ff750bf4cc46-00");
        let scope = derive_scope(&context, "GET /api/status");
        assert_eq!(scope.operation_id, "763230142f4317478bf6bdcee3886ef0");
        assert_eq!(scope.parent_id.as_deref(), Some("2839ff750bf4cc46"));
        assert_eq!(scope.operation_name, "GET /api/status");
    }

    #[test]
    fn derive_scope_generates_an_id_without_a_header() {
        let scope = derive_scope(&InvocationContext::new(), "QueueWorker");
        assert_eq!(scope.operation_id.len(), 32);
        assert!(scope.parent_id.is_none());
    }

    #[tokio::test]
    async fn scope_tags_fill_only_missing_entries() {
        let scope = CorrelationScope {
            operation_id: "aaaabbbbccccddddaaaabbbbccccdddd".to_string(),
            parent_id: Some("2839ff750bf4cc46".to_string()),
            operation_name: "QueueWorker".to_string(),
        };

        with_scope(scope, async {
            let mut tags = TagOverrides::new();
            apply_scope_tags(&mut tags);
            assert_eq!(
                tags.get(OPERATION_ID_TAG).map(String::as_str),
                Some("aaaabbbbccccddddaaaabbbbccccdddd")
            );
            assert_eq!(
                tags.get(OPERATION_PARENT_ID_TAG).map(String::as_str),
                Some("2839ff750bf4cc46")
            );

            let mut tags = TagOverrides::new();
            tags.insert(OPERATION_ID_TAG.to_string(), "explicit".to_string());
            apply_scope_tags(&mut tags);
            assert_eq!(
                tags.get(OPERATION_ID_TAG).map(String::as_str),
                Some("explicit")
            );
        })
        .await;
    }

    #[test]
    fn no_scope_means_no_tag_changes() {
        let mut tags = TagOverrides::new();
        apply_scope_tags(&mut tags);
        assert!(tags.is_empty());
    }

    #[tokio::test]
    async fn client_envelopes_take_the_scoped_operation_name() {
        let config = TelemetryConfig::new("00000000-0000-0000-0000-000000000001", "worker");
        let (client, _handle) = TelemetryClient::spawn(config, Vec::new()).expect("client");

        // Without a scope only the cloud role is ambient.
        let bare = client.envelope(MESSAGE_DATA, BaseData::default(), TagOverrides::new());
        assert_eq!(bare.tags.get(CLOUD_ROLE_TAG).map(String::as_str), Some("worker"));
        assert!(bare.tags.get(OPERATION_NAME_TAG).is_none());

        let scope = CorrelationScope {
            operation_id: "763230142f4317478bf6bdcee3886ef0".to_string(),
            parent_id: None,
            operation_name: "GET /api/status".to_string(),
        };
        with_scope(scope, async {
            let envelope = client.envelope(MESSAGE_DATA, BaseData::default(), TagOverrides::new());
            assert_eq!(
                envelope.tags.get(OPERATION_NAME_TAG).map(String::as_str),
                Some("GET /api/status")
            );
            assert_eq!(
                envelope.tags.get(OPERATION_ID_TAG).map(String::as_str),
                Some("763230142f4317478bf6bdcee3886ef0")
            );
            assert_eq!(
                envelope.tags.get(CLOUD_ROLE_TAG).map(String::as_str),
                Some("worker")
            );
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn steady_trickle_still_flushes_on_the_interval() {
        use std::sync::atomic::AtomicUsize;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let endpoint = format!("http://{}", listener.local_addr().expect("addr"));
        let posts = Arc::new(AtomicUsize::new(0));
        let posts_seen = posts.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let posts = posts_seen.clone();
                tokio::spawn(async move {
                    let mut pending = Vec::new();
                    let mut buf = [0u8; 8192];
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => pending.extend_from_slice(&buf[..n]),
                        }
                        if let Some(body_len) = content_length(&pending) {
                            let head_end = header_end(&pending).unwrap_or(pending.len());
                            if pending.len() >= head_end + body_len {
                                posts.fetch_add(1, Ordering::SeqCst);
                                let _ = stream
                                    .write_all(
                                        b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                                    )
                                    .await;
                                break;
                            }
                        }
                    }
                });
            }
        });

        let mut config = TelemetryConfig::new(
            format!(
                "InstrumentationKey=00000000-0000-0000-0000-000000000001;IngestionEndpoint={}",
                endpoint
            ),
            "worker",
        );
        // Make the interval the only flush trigger.
        config.batch_size = 10_000;
        config.flush_interval = Duration::from_millis(50);
        let (client, _handle) = TelemetryClient::spawn(config, Vec::new()).expect("client");

        // Messages arrive faster than the flush interval the whole time.
        for _ in 0..30 {
            client.track_trace(
                TraceTelemetry {
                    message: "tick".to_string(),
                    severity: Severity::Information,
                    properties: BTreeMap::new(),
                },
                TagOverrides::new(),
            );
            sleep(Duration::from_millis(10)).await;
        }

        assert!(
            posts.load(Ordering::SeqCst) >= 1,
            "interval flush never fired while envelopes kept arriving"
        );
    }

    fn header_end(bytes: &[u8]) -> Option<usize> {
        bytes.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
    }

    fn content_length(bytes: &[u8]) -> Option<usize> {
        let head = &bytes[..header_end(bytes)?];
        let head = std::str::from_utf8(head).ok()?;
        head.lines().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
    }

    #[test]
    fn spool_files_contain_one_parseable_line_per_envelope() {
        let dir = tempfile::tempdir().expect("tempdir");
        let envelope = Envelope {
            time: Utc::now(),
            base_type: MESSAGE_DATA.to_string(),
            base: BaseData::default(),
            tags: TagOverrides::new(),
            i_key: "00000000-0000-0000-0000-000000000001".to_string(),
        };
        spill_to_spool(dir.path(), &[envelope.clone(), envelope]);

        let path = dir
            .path()
            .join(format!("telemetry-spool-{}.jsonl", date_filename()));
        let contents = std::fs::read_to_string(&path).expect("spool file");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            assert!(!line.trim().is_empty());
            serde_json::from_str::<serde_json::Value>(line).expect("well-formed spool line");
        }
    }
}
