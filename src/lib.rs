pub mod record;
pub mod context;
pub mod operation_id;
pub mod service_bus;
pub mod url_obfuscator;
pub mod config;
pub mod sink;
pub mod console;
pub mod file_sink;
pub mod telemetry;
pub mod processors;
pub mod adapter;
pub mod logger;
pub mod correlation;

pub mod memory_sink;
