//! Diagnostic emission backend.
//!
//! Diagnostics go to the `log` facade and, when installed, to a custom sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use super::kind::{Diagnostic, DiagnosticKind};
use crate::sync::mutex::Mutex;

/// Global flag to suppress diagnostic output (for testing).
static DIAGNOSTICS_SUPPRESSED: AtomicBool = AtomicBool::new(false);

fn sink_slot() -> &'static Mutex<Option<Arc<dyn DiagnosticSink>>> {
    static SINK: OnceLock<Mutex<Option<Arc<dyn DiagnosticSink>>>> = OnceLock::new();
    SINK.get_or_init(|| Mutex::new(None))
}

/// Suppress all diagnostic output.
pub fn suppress_diagnostics(suppress: bool) {
    DIAGNOSTICS_SUPPRESSED.store(suppress, Ordering::Relaxed);
}

/// Check if diagnostics are suppressed.
pub fn is_suppressed() -> bool {
    DIAGNOSTICS_SUPPRESSED.load(Ordering::Relaxed)
}

/// Route diagnostics to `sink` in addition to the log.
pub fn install_sink(sink: Arc<dyn DiagnosticSink>) {
    *sink_slot().lock() = Some(sink);
}

/// Remove the installed sink.
pub fn clear_sink() {
    *sink_slot().lock() = None;
}

/// Emit a diagnostic.
pub fn emit(diag: &Diagnostic) {
    if is_suppressed() {
        return;
    }
    emit_to_log(diag, None);
    forward(diag);
}

/// Emit a diagnostic with additional runtime context.
pub fn emit_with_context(diag: &Diagnostic, context: &str) {
    if is_suppressed() {
        return;
    }
    emit_to_log(diag, Some(context));
    forward(diag);
}

fn forward(diag: &Diagnostic) {
    let sink = sink_slot().lock().clone();
    if let Some(sink) = sink {
        sink.emit(diag);
    }
}

fn emit_to_log(diag: &Diagnostic, context: Option<&str>) {
    let level = match diag.kind {
        DiagnosticKind::Error => log::Level::Error,
        DiagnosticKind::Warning => log::Level::Warn,
        DiagnosticKind::Note => log::Level::Debug,
    };
    if !log::log_enabled!(level) {
        return;
    }

    match context {
        Some(context) => log::log!(level, "[{}] {}: {} ({})", diag.code, diag.kind.prefix(), diag.message, context),
        None => log::log!(level, "[{}] {}: {}", diag.code, diag.kind.prefix(), diag.message),
    }
    if let Some(note) = diag.note {
        log::log!(level, "  note: {}", note);
    }
    if let Some(help) = diag.help {
        log::log!(level, "  help: {}", help);
    }
}

/// A diagnostic sink trait for custom output.
pub trait DiagnosticSink: Send + Sync {
    /// Handle a diagnostic.
    fn emit(&self, diag: &Diagnostic);
}

/// A simple sink that collects diagnostics.
#[derive(Default)]
pub struct CollectingSink {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl CollectingSink {
    /// Create a new collecting sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected diagnostics.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().clone()
    }

    /// True if a diagnostic with `code` was collected.
    pub fn contains(&self, code: &str) -> bool {
        self.diagnostics.lock().iter().any(|d| d.code == code)
    }

    /// Clear collected diagnostics.
    pub fn clear(&self) {
        self.diagnostics.lock().clear();
    }

    /// Check if any errors were collected.
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .lock()
            .iter()
            .any(|d| d.kind == DiagnosticKind::Error)
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, diag: &Diagnostic) {
        self.diagnostics.lock().push(diag.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::kind::{TA001, TA901};

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingSink::new();
        sink.emit(&TA001);
        assert_eq!(sink.diagnostics().len(), 1);
        assert!(sink.contains("TA001"));
        assert!(!sink.has_errors());

        sink.emit(&TA901);
        assert!(sink.has_errors());

        sink.clear();
        assert_eq!(sink.diagnostics().len(), 0);
    }
}
