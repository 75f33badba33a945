use telemetry_log_sink::config::Config;
use telemetry_log_sink::logger::{Logger, Properties};
use telemetry_log_sink::record::{HttpFailure, LogLevel};

fn main() {
    // Development mode: console only, no backend credentials needed.
    let config = Config::development(LogLevel::PageView);
    let logger = Logger::new("demo-project", "demo-worker", &config).expect("construct logger");

    logger.info("service starting", None);
    logger.warn(
        "cache miss rate elevated",
        Some(Properties::new().insert("missRate", 0.42)),
    );
    logger.event("user-signed-in", Some("first login"), None);

    let failure = HttpFailure::new(502, Some(serde_json::json!({"error": "bad gateway"})));
    logger.error(&failure, Some("address lookup failed"), None);

    logger.dependency(
        "GET /api/address",
        Some("http://localhost:7002/api/?address=london&key=keyhere"),
        Some(
            Properties::new()
                .insert("durationMs", 18.0)
                .insert("resultCode", 200)
                .insert("success", true),
        ),
    );
}
