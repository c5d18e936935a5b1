//! Diagnostic kinds and core types.

/// The severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A hard error - something is definitely wrong.
    Error,
    /// A warning - the allocator degraded but kept serving.
    Warning,
    /// Informational; logged at debug level.
    Note,
}

impl DiagnosticKind {
    /// Get the display prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            DiagnosticKind::Error => "error",
            DiagnosticKind::Warning => "warning",
            DiagnosticKind::Note => "note",
        }
    }
}

/// A diagnostic message with code, message, and optional context.
///
/// Diagnostic codes follow the pattern:
/// - `TA0xx` - Allocation path
/// - `TA1xx` - NUMA and page placement
/// - `TA2xx` - Linked blocks
/// - `TA3xx` - Maintenance
/// - `TA9xx` - Internal errors
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity level.
    pub kind: DiagnosticKind,
    /// Diagnostic code (e.g., "TA001").
    pub code: &'static str,
    /// Primary message.
    pub message: &'static str,
    /// Optional additional context.
    pub note: Option<&'static str>,
    /// Optional fix suggestion.
    pub help: Option<&'static str>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub const fn error(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Error,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Create a new warning diagnostic.
    pub const fn warning(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Warning,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Create a new note diagnostic.
    pub const fn note(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Note,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Add a note to this diagnostic.
    pub const fn with_note(mut self, note: &'static str) -> Self {
        self.note = Some(note);
        self
    }

    /// Add a help message to this diagnostic.
    pub const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

// =============================================================================
// Predefined diagnostics (TA0xx - Allocation path)
// =============================================================================

/// TA001: Allocation failed after every retry.
pub const TA001: Diagnostic = Diagnostic::warning(
    "TA001",
    "allocation failed after all retries"
).with_note("every eligible pool was exhausted and the system heap refused the request")
 .with_help("raise pool_budget or max_allocation_retries in AllocConfig, or enable low-memory mode");

/// TA002: Pools exhausted and heap fallback forbidden.
pub const TA002: Diagnostic = Diagnostic::warning(
    "TA002",
    "pool ladder exhausted and NO_FALLBACK forbids the system heap"
).with_help("drop AllocFlags::NO_FALLBACK or add a larger size class");

/// TA003: Deallocation of an address this allocator never returned.
pub const TA003: Diagnostic = Diagnostic::note(
    "TA003",
    "deallocate ignored an unknown address"
).with_note("the call was a no-op and no counter changed");

/// TA004: Compression requested.
pub const TA004: Diagnostic = Diagnostic::warning(
    "TA004",
    "enable_compression is not supported and is ignored"
);

// =============================================================================
// Predefined diagnostics (TA1xx - NUMA and page placement)
// =============================================================================

/// TA101: Requested NUMA node does not exist.
pub const TA101: Diagnostic = Diagnostic::warning(
    "TA101",
    "requested NUMA node is unavailable, using node 0"
).with_help("query numa_nodes() for the detected topology");

/// TA102: Kernel refused a node binding.
pub const TA102: Diagnostic = Diagnostic::note(
    "TA102",
    "mbind failed, pages follow the default policy"
);

/// TA103: Page locking failed.
pub const TA103: Diagnostic = Diagnostic::warning(
    "TA103",
    "could not lock pool pages in RAM"
).with_help("raise RLIMIT_MEMLOCK or disable enable_memory_locking");

// =============================================================================
// Predefined diagnostics (TA2xx - Linked blocks)
// =============================================================================

/// TA201: Link expired.
pub const TA201: Diagnostic = Diagnostic::note(
    "TA201",
    "linked pair expired"
).with_help("call restore_link() to revive the pair or unlink() to release it");

// =============================================================================
// Predefined diagnostics (TA3xx - Maintenance)
// =============================================================================

/// TA301: Fragmentation above threshold after compaction.
pub const TA301: Diagnostic = Diagnostic::warning(
    "TA301",
    "fragmentation above configured threshold after compaction"
).with_note("free memory is spread across many size classes")
 .with_help("tune pool_size_classes to the workload's allocation sizes");

/// TA302: Low-memory mode reclaimed stale allocations.
pub const TA302: Diagnostic = Diagnostic::warning(
    "TA302",
    "low-memory mode reclaimed stale allocations"
).with_note("pointers to reclaimed allocations are now dangling")
 .with_help("raise stale_allocation_age or leave low-memory mode sooner");

/// TA303: Maintenance thread could not be spawned.
pub const TA303: Diagnostic = Diagnostic::error(
    "TA303",
    "failed to spawn maintenance thread"
).with_help("run maintenance passes manually with run_maintenance()");

// =============================================================================
// Predefined diagnostics (TA9xx - Internal)
// =============================================================================

/// TA901: Internal bookkeeping mismatch.
pub const TA901: Diagnostic = Diagnostic::error(
    "TA901",
    "allocation table and tier bookkeeping disagree"
).with_note("this indicates a bug in tieralloc");
