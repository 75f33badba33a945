use crate::context::{HttpRequestInfo, InvocationContext};
use crate::telemetry::{with_scope, TelemetryChannel};
use std::future::Future;
use std::sync::Arc;
use url::Url;

/// Wrap an HTTP-triggered handler with a correlation scope.
///
/// The operation name is derived from the request (`METHOD /path`);
/// everything logged or tracked while the handler runs inherits the
/// scope's operation id. Buffered telemetry is flushed after the
/// handler finishes; the handler's own error propagates untouched
/// after the flush attempt.
pub async fn http_trigger_wrapper<T, E, Fut>(
    channel: &Arc<dyn TelemetryChannel>,
    context: &InvocationContext,
    request: &HttpRequestInfo,
    handler: Fut,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    let operation_name = format!("{} {}", request.method, request_path(&request.url));
    run_in_scope(channel, context, operation_name, handler).await
}

/// Wrap a non-HTTP-triggered handler (timer, queue) with a correlation
/// scope. The bound function's name becomes the operation name.
pub async fn non_http_trigger_wrapper<T, E, Fut>(
    channel: &Arc<dyn TelemetryChannel>,
    context: &InvocationContext,
    handler: Fut,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    let operation_name = context.function_name.clone().unwrap_or_default();
    run_in_scope(channel, context, operation_name, handler).await
}

async fn run_in_scope<T, E, Fut>(
    channel: &Arc<dyn TelemetryChannel>,
    context: &InvocationContext,
    operation_name: String,
    handler: Fut,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    let scope = channel.start_operation(context, &operation_name);
    let result = with_scope(scope, handler).await;

    // Flush before returning so short-lived invocations don't lose
    // buffered telemetry. A flush failure never masks the handler's
    // own outcome.
    if let Err(error) = channel.flush().await {
        tracing::warn!(%error, "telemetry flush after handler failed");
    }

    result
}

fn request_path(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => url.path().to_string(),
        Err(_) => raw.to_string(),
    }
}
