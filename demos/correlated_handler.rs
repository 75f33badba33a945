use std::sync::Arc;
use telemetry_log_sink::adapter::TelemetryAdapter;
use telemetry_log_sink::context::{HttpRequestInfo, InvocationContext};
use telemetry_log_sink::correlation::http_trigger_wrapper;
use telemetry_log_sink::logger::Logger;
use telemetry_log_sink::memory_sink::InMemoryChannel;
use telemetry_log_sink::record::LogLevel;
use telemetry_log_sink::telemetry::TelemetryChannel;

#[tokio::main]
async fn main() {
    // An in-memory channel stands in for the real backend so the demo
    // runs without credentials; swap in a configured TelemetryAdapter
    // for production.
    let channel = Arc::new(InMemoryChannel::new());
    let dynamic: Arc<dyn TelemetryChannel> = channel.clone();

    let adapter = Arc::new(TelemetryAdapter::with_channel(dynamic.clone()));
    let logger = Logger::with_sinks("demo-project", "api", LogLevel::PageView, vec![adapter]);

    let context = InvocationContext::new()
        .with_traceparent("00-763230142f4317478bf6bdcee3886ef0-2839ff750bf4cc46-00");
    let request = HttpRequestInfo::new("GET", "http://localhost:7002/api/status");

    let result: Result<(), std::convert::Infallible> =
        http_trigger_wrapper(&dynamic, &context, &request, async {
            logger.info("handling status request", None);
            logger.event("status-checked", None, None);
            Ok(())
        })
        .await;
    result.expect("handler");

    for call in channel.calls() {
        println!("{:?}", call);
    }
    println!("flushes: {}", channel.flush_count());
}
