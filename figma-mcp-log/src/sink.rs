//! Error-log sinks.
//!
//! The transport reports every classified failure through an [`ErrorLog`]
//! before handing the error back, so failures are never silent even when the
//! caller discards them.

use parking_lot::Mutex;

/// Callback receiving `(context, message)` for each classified error.
///
/// Any `Fn(&str, &str)` closure qualifies.
pub trait ErrorLog: Send + Sync {
    /// Record one failure.
    fn log(&self, context: &str, message: &str);
}

impl<F> ErrorLog for F
where
    F: Fn(&str, &str) + Send + Sync,
{
    fn log(&self, context: &str, message: &str) {
        self(context, message)
    }
}

/// Forwards errors to `tracing` at ERROR level under the `figma_mcp::errors` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorLog;

impl ErrorLog for TracingErrorLog {
    fn log(&self, context: &str, message: &str) {
        tracing::error!(target: "figma_mcp::errors", context, "{}", message);
    }
}

/// A single captured log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub context: String,
    pub message: String,
}

/// Keeps entries in memory. Used by tests and by diagnostics endpoints that
/// want to show recent failures.
#[derive(Debug, Default)]
pub struct MemoryErrorLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything logged so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl ErrorLog for MemoryErrorLog {
    fn log(&self, context: &str, message: &str) {
        self.entries.lock().push(LogEntry {
            context: context.to_string(),
            message: message.to_string(),
        });
    }
}

/// Shorten `text` to at most `max_chars` characters, appending `...` when cut.
///
/// Cuts on a character boundary, never inside a multi-byte sequence.
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
