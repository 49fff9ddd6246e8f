use crate::errors::BatchError;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), BatchError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| BatchError::Io(e.to_string()))?;
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| BatchError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| BatchError::Io(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| BatchError::Io(e.to_string()))?;
        drop(file);

        self.rotate_if_over_budget()
    }

    /// Path the current log moves to once it grows past `budget_bytes`.
    pub fn rotated_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".1");
        PathBuf::from(name)
    }

    fn rotate_if_over_budget(&self) -> Result<(), BatchError> {
        let len = fs::metadata(&self.path)
            .map_err(|e| BatchError::Io(e.to_string()))?
            .len();
        if len <= self.budget_bytes {
            return Ok(());
        }
        fs::rename(&self.path, self.rotated_path()).map_err(|e| BatchError::Io(e.to_string()))
    }
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}

static RUN_LOGGER: OnceLock<Mutex<Option<JsonlLogger>>> = OnceLock::new();

fn logger_slot() -> &'static Mutex<Option<JsonlLogger>> {
    RUN_LOGGER.get_or_init(|| Mutex::new(None))
}

/// Route batch events to `logger` until [`clear_run_logger`] is called.
pub fn init_run_logger(logger: JsonlLogger) -> Result<(), BatchError> {
    if let Some(parent) = logger.path.parent() {
        fs::create_dir_all(parent).map_err(|e| BatchError::Io(e.to_string()))?;
    }
    *logger_slot()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(logger);
    Ok(())
}

pub fn clear_run_logger() {
    *logger_slot()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
}

/// Appends one event to the run log. No-op when no run logger is installed;
/// write failures are dropped so logging never changes batch behaviour.
pub fn log_event(level: &str, event_type: &str, payload: Value) {
    let logger = logger_slot()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();
    if let Some(logger) = logger {
        let _ = logger.append(&LogEvent {
            level,
            event_type,
            payload,
        });
    }
}
