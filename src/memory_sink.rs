use crate::record::LogRecord;
use crate::sink::LogSink;
use crate::telemetry::{
    apply_scope_tags, DependencyTelemetry, EventTelemetry, ExceptionTelemetry, PageViewTelemetry,
    RequestTelemetry, TagOverrides, TelemetryChannel, TelemetryError, TraceTelemetry,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Sink that records every [`LogRecord`] in memory.
///
/// Useful for asserting on facade output in tests and for measuring
/// the overhead of the facade itself without any I/O.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl LogSink for MemorySink {
    fn handle(&self, record: &LogRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
    }
}

/// One call captured by [`InMemoryChannel`].
#[derive(Debug, Clone)]
pub enum TrackedCall {
    Trace {
        telemetry: TraceTelemetry,
        tags: TagOverrides,
    },
    Exception {
        telemetry: ExceptionTelemetry,
        tags: TagOverrides,
    },
    Event {
        telemetry: EventTelemetry,
        tags: TagOverrides,
    },
    Dependency {
        telemetry: DependencyTelemetry,
        tags: TagOverrides,
    },
    Request {
        telemetry: RequestTelemetry,
        tags: TagOverrides,
    },
    PageView {
        telemetry: PageViewTelemetry,
        tags: TagOverrides,
    },
}

/// Telemetry backend substitute that records every call in memory.
///
/// Applies the same scope-tag fallback as the real client so tests see
/// the correlation behavior the production channel would produce.
#[derive(Default)]
pub struct InMemoryChannel {
    calls: Mutex<Vec<TrackedCall>>,
    flushes: AtomicUsize,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        InMemoryChannel::default()
    }

    pub fn calls(&self) -> Vec<TrackedCall> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    fn push(&self, call: TrackedCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl TelemetryChannel for InMemoryChannel {
    fn track_trace(&self, telemetry: TraceTelemetry, mut tags: TagOverrides) {
        apply_scope_tags(&mut tags);
        self.push(TrackedCall::Trace { telemetry, tags });
    }

    fn track_exception(&self, telemetry: ExceptionTelemetry, mut tags: TagOverrides) {
        apply_scope_tags(&mut tags);
        self.push(TrackedCall::Exception { telemetry, tags });
    }

    fn track_event(&self, telemetry: EventTelemetry, mut tags: TagOverrides) {
        apply_scope_tags(&mut tags);
        self.push(TrackedCall::Event { telemetry, tags });
    }

    fn track_dependency(&self, telemetry: DependencyTelemetry, mut tags: TagOverrides) {
        apply_scope_tags(&mut tags);
        self.push(TrackedCall::Dependency { telemetry, tags });
    }

    fn track_request(&self, telemetry: RequestTelemetry, mut tags: TagOverrides) {
        apply_scope_tags(&mut tags);
        self.push(TrackedCall::Request { telemetry, tags });
    }

    fn track_page_view(&self, telemetry: PageViewTelemetry, mut tags: TagOverrides) {
        apply_scope_tags(&mut tags);
        self.push(TrackedCall::PageView { telemetry, tags });
    }

    async fn flush(&self) -> Result<(), TelemetryError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
