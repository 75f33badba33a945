use crate::config::Config;
use crate::record::{LogLevel, LogRecord, RecordKind};
use crate::sink::LogSink;
use colored::{ColoredString, Colorize};

/// Console sink used in every mode so records stay locally visible
/// even when the telemetry backend is unreachable.
pub struct ConsoleSink {
    pretty_print: bool,
    include_meta: bool,
}

impl ConsoleSink {
    pub fn new(config: &Config) -> Self {
        ConsoleSink {
            pretty_print: config.pretty_print,
            include_meta: config.console_meta,
        }
    }

    fn format_line(&self, record: &LogRecord) -> String {
        let mut line = format!(
            "{} {} [{}::{}]",
            record.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            level_label(record.level),
            record.project_name,
            record.component_name,
        );

        if !record.operation_id.is_empty() {
            line.push_str(&format!(" [op:{}]", record.operation_id));
        }

        if !record.message.is_empty() {
            line.push(' ');
            line.push_str(&record.message);
        }

        match &record.kind {
            RecordKind::Trace => {}
            RecordKind::Exception { error } => {
                line.push_str(&format!(" error={}", error.message));
                if let Some(stack) = &error.stack {
                    line.push('\n');
                    line.push_str(stack);
                }
            }
            RecordKind::Event { name } => {
                line.push_str(&format!(" name={}", name));
            }
            RecordKind::Dependency {
                name,
                data,
                duration_ms,
                result_code,
                success,
                ..
            } => {
                line.push_str(&format!(
                    " dependency={} target={} duration_ms={} result={} success={}",
                    name, data, duration_ms, result_code, success
                ));
            }
            RecordKind::Request {
                name,
                url,
                duration_ms,
                result_code,
                success,
                ..
            } => {
                line.push_str(&format!(
                    " request={} url={} duration_ms={} result={} success={}",
                    name, url, duration_ms, result_code, success
                ));
            }
            RecordKind::PageView { name } => {
                line.push_str(&format!(" page={}", name));
            }
        }

        if self.include_meta && !record.properties.is_empty() {
            let meta = if self.pretty_print {
                serde_json::to_string_pretty(&record.properties)
            } else {
                serde_json::to_string(&record.properties)
            };
            if let Ok(meta) = meta {
                line.push(' ');
                line.push_str(&meta);
            }
        }

        line
    }
}

impl LogSink for ConsoleSink {
    fn handle(&self, record: &LogRecord) {
        let line = self.format_line(record);
        match record.level {
            LogLevel::Critical | LogLevel::Error => eprintln!("{}", line),
            _ => println!("{}", line),
        }
    }
}

fn level_label(level: LogLevel) -> ColoredString {
    match level {
        LogLevel::Critical => "CRIT".red().bold(),
        LogLevel::Error => "ERROR".red(),
        LogLevel::Warning => "WARN".yellow(),
        LogLevel::Info => "INFO".green(),
        LogLevel::Debug => "DEBUG".blue(),
        LogLevel::Security => "SECURITY".magenta(),
        LogLevel::Audit => "AUDIT".cyan(),
        LogLevel::Event => "EVENT".cyan().bold(),
        LogLevel::Request => "REQUEST".white().bold(),
        LogLevel::Dependency => "DEPENDENCY".white(),
        LogLevel::PageView => "PAGEVIEW".white(),
    }
}
