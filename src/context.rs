use serde::{Deserialize, Serialize};

/// Distributed-tracing context carried by an inbound invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceContext {
    /// `traceparent`-shaped header: `{version}-{trace-id}-{parent-id}-{flags}`.
    pub traceparent: Option<String>,
    pub tracestate: Option<String>,
}

/// Shape of the HTTP request behind an HTTP-triggered invocation, used
/// to derive the operation name for the correlation scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequestInfo {
    pub method: String,
    pub url: String,
}

impl HttpRequestInfo {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        HttpRequestInfo {
            method: method.into(),
            url: url.into(),
        }
    }
}

/// Context describing one inbound invocation (HTTP request, queue
/// message, timer tick).
///
/// Every field is optional; the extractors in
/// [`crate::operation_id`] and [`crate::service_bus`] tolerate any
/// level being absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvocationContext {
    /// Name of the bound function handling the invocation.
    pub function_name: Option<String>,
    pub trace_context: Option<TraceContext>,
    /// Runtime binding data. For message-broker triggers this carries
    /// the nested `applicationProperties` bag.
    pub binding_data: Option<serde_json::Value>,
}

impl InvocationContext {
    pub fn new() -> Self {
        InvocationContext::default()
    }

    pub fn with_function_name(mut self, name: impl Into<String>) -> Self {
        self.function_name = Some(name.into());
        self
    }

    pub fn with_traceparent(mut self, traceparent: impl Into<String>) -> Self {
        let trace_context = self.trace_context.get_or_insert_with(TraceContext::default);
        trace_context.traceparent = Some(traceparent.into());
        self
    }

    pub fn with_binding_data(mut self, binding_data: serde_json::Value) -> Self {
        self.binding_data = Some(binding_data);
        self
    }
}
