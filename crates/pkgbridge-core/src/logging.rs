use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::SystemTime;

use tracing_subscriber::EnvFilter;

use crate::models::ManagerId;

/// Environment variable holding the `EnvFilter` directives.
pub const LOG_ENV_VAR: &str = "PKGBRIDGE_LOG";

const MAX_OPERATION_RECORDS: usize = 512;
const MAX_DIAGNOSTIC_LINES: usize = 2048;
const MAX_OUTPUT_BYTES: usize = 128 * 1024;

/// Installs the global fmt subscriber. Later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One backend invocation: what ran and everything it printed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ManagerOperationRecord {
    pub manager: ManagerId,
    pub command_line: String,
    pub output: String,
    pub exit_code: Option<i32>,
    pub recorded_at: SystemTime,
}

impl ManagerOperationRecord {
    pub fn new(
        manager: ManagerId,
        command_line: impl Into<String>,
        output: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self {
            manager,
            command_line: command_line.into(),
            output: output.into(),
            exit_code,
            recorded_at: SystemTime::now(),
        }
    }
}

/// Append-only sink shared by every backend adapter.
pub trait OperationLog: Send + Sync {
    fn diagnostic(&self, level: LogLevel, message: &str);

    fn manager_operation(&self, record: ManagerOperationRecord);
}

/// Forwards everything to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingOperationLog;

impl OperationLog for TracingOperationLog {
    fn diagnostic(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!("{message}"),
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
    }

    fn manager_operation(&self, record: ManagerOperationRecord) {
        tracing::debug!(
            manager = ?record.manager,
            command = %record.command_line,
            exit_code = ?record.exit_code,
            output_bytes = record.output.len(),
            "manager operation finished"
        );
    }
}

/// Keeps the most recent records in memory so they can be shown again.
#[derive(Debug, Default)]
pub struct InMemoryOperationLog {
    operations: Mutex<VecDeque<ManagerOperationRecord>>,
    diagnostics: Mutex<VecDeque<(LogLevel, String)>>,
}

impl InMemoryOperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operations(&self) -> Vec<ManagerOperationRecord> {
        self.operations
            .lock()
            .map(|records| records.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn operations_for(&self, manager: ManagerId) -> Vec<ManagerOperationRecord> {
        self.operations()
            .into_iter()
            .filter(|record| record.manager == manager)
            .collect()
    }

    pub fn diagnostics(&self) -> Vec<(LogLevel, String)> {
        self.diagnostics
            .lock()
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn diagnostics_at_least(&self, level: LogLevel) -> Vec<String> {
        self.diagnostics()
            .into_iter()
            .filter(|(line_level, _)| *line_level >= level)
            .map(|(_, message)| message)
            .collect()
    }
}

impl OperationLog for InMemoryOperationLog {
    fn diagnostic(&self, level: LogLevel, message: &str) {
        if let Ok(mut lines) = self.diagnostics.lock() {
            if lines.len() >= MAX_DIAGNOSTIC_LINES {
                lines.pop_front();
            }
            lines.push_back((level, message.to_string()));
        }
    }

    fn manager_operation(&self, mut record: ManagerOperationRecord) {
        record.output = tail(&record.output, MAX_OUTPUT_BYTES).to_string();
        if let Ok(mut records) = self.operations.lock() {
            if records.len() >= MAX_OPERATION_RECORDS {
                records.pop_front();
            }
            records.push_back(record);
        }
    }
}

/// Last `max_bytes` of `text`, moved forward to a character boundary.
fn tail(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
