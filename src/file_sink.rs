use crate::record::LogRecord;
use crate::sink::LogSink;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Current UTC date as `YYYY-MM-DD`, used to stamp daily file names.
pub fn date_filename() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Optional sink appending records as JSON lines to a daily file.
///
/// Write failures are logged and the record is dropped; file problems
/// must never take down the logging call.
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSink {
    /// Open (append/create) `{dir}/{project_name}-{YYYY-MM-DD}.log`.
    pub fn open(dir: &Path, project_name: &str) -> std::io::Result<Self> {
        let path = dir.join(format!("{}-{}.log", project_name, date_filename()));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(FileSink {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileSink {
    fn handle(&self, record: &LogRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(error) => {
                tracing::warn!(%error, "failed to serialize record for file sink");
                return;
            }
        };
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(error) = writeln!(file, "{}", line) {
            tracing::warn!(%error, path = %self.path.display(), "file sink write failed");
        }
    }
}
