use crate::record::LogRecord;

/// Destination for [`LogRecord`]s produced by the logger facade.
///
/// Implementations transport records to a concrete destination (the
/// console, a daily file, the cloud telemetry backend). `handle` is
/// called synchronously on the logging thread and must return once the
/// record has been handed off; any network I/O belongs on a background
/// export path, never at the call site.
///
/// Sinks own their failure handling. A sink that cannot deliver a
/// record drops it (best-effort contract); it never panics and never
/// surfaces errors to the logging call.
pub trait LogSink: Send + Sync {
    /// Hand one fully-populated record to the sink.
    fn handle(&self, record: &LogRecord);
}
